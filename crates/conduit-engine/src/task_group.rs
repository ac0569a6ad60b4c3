//! Task-group container: runs a group's tasks with bounded concurrency,
//! retries fail-over capable tasks, and reports the group aggregate.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_sdk::{sleep_cancellable, CancellationToken, SinkConnector, SourceConnector};
use conduit_types::{Communication, Failure, State, TaskGroupId, TaskId};

use crate::assign::{TaskConfig, TaskGroupPlan};
use crate::channel::ChannelConfig;
use crate::communicator::TaskGroupCommunicator;
use crate::config::types::TaskGroupConfig;
use crate::errors::{compute_retry_backoff, EngineError};
use crate::executor::{ExecutorParams, TaskExecutor};
use crate::monitor::TaskHangMonitor;
use crate::report::Reporter;

/// Per-group runtime knobs resolved from the job config.
#[derive(Debug, Clone)]
pub struct TaskGroupOptions {
    pub channel: ChannelConfig,
    pub task_group: TaskGroupConfig,
    pub hang_expiry: Duration,
    pub max_dirty_logged: u64,
}

struct PendingTask {
    task: TaskConfig,
    attempt: u32,
    ready_at: Instant,
}

/// Runs the tasks of one [`TaskGroupPlan`].
///
/// At most `channel_number` tasks run at once. A failed task whose writer
/// supports fail-over is retried with exponential backoff until
/// `max_attempts` is reached; any other failure fails the group and shuts
/// down the remaining tasks.
pub struct TaskGroupContainer {
    job: String,
    plan: TaskGroupPlan,
    reader: Arc<dyn SourceConnector>,
    writer: Arc<dyn SinkConnector>,
    options: TaskGroupOptions,
    reporter: Arc<dyn Reporter>,
    cancel: CancellationToken,
}

impl TaskGroupContainer {
    pub fn new(
        job: impl Into<String>,
        plan: TaskGroupPlan,
        reader: Arc<dyn SourceConnector>,
        writer: Arc<dyn SinkConnector>,
        options: TaskGroupOptions,
        reporter: Arc<dyn Reporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job: job.into(),
            plan,
            reader,
            writer,
            options,
            reporter,
            cancel,
        }
    }

    pub fn group_id(&self) -> TaskGroupId {
        self.plan.group_id
    }

    /// Run every task to completion and return the group's final
    /// communication, which is also reported.
    pub fn start(self) -> Communication {
        let group_id = self.plan.group_id;
        tracing::info!(
            group = group_id.get(),
            tasks = self.plan.tasks.len(),
            channels = self.plan.channel_number,
            "Task group starting"
        );

        let mut communicator = TaskGroupCommunicator::new();
        let mut running: BTreeMap<TaskId, TaskExecutor> = BTreeMap::new();
        let result = self.run(&mut communicator, &mut running);
        for executor in running.values_mut() {
            executor.shutdown();
        }

        let mut final_comm = communicator.collect();
        match result {
            Ok(()) => {
                tracing::info!(
                    group = group_id.get(),
                    records = final_comm.total_read_records(),
                    "Task group completed"
                );
            }
            Err(EngineError::Killed) => {
                tracing::warn!(group = group_id.get(), "Task group killed");
                final_comm.set_failure(Failure::killed(format!("task group {group_id} killed")));
                final_comm.force_state(State::Killed);
            }
            Err(e) => {
                tracing::error!(group = group_id.get(), error = %e, "Task group failed");
                let mut head = Communication::succeeded();
                head.mark_failed(e.to_failure());
                final_comm = head.merge(&final_comm);
            }
        }
        self.reporter.report_task_group(group_id, final_comm.clone());
        final_comm
    }

    fn run(
        &self,
        communicator: &mut TaskGroupCommunicator,
        running: &mut BTreeMap<TaskId, TaskExecutor>,
    ) -> Result<(), EngineError> {
        let group_id = self.plan.group_id;
        let settings = &self.options.task_group;
        let fail_over = &settings.fail_over;
        let tick = Duration::from_millis(settings.sleep_interval_ms.max(1));
        let report_interval = Duration::from_millis(settings.report_interval_ms);

        let now = Instant::now();
        let mut pending: VecDeque<PendingTask> = self
            .plan
            .tasks
            .iter()
            .map(|task| {
                communicator.register(task.task_id);
                PendingTask {
                    task: task.clone(),
                    attempt: 1,
                    ready_at: now,
                }
            })
            .collect();
        let mut monitor = TaskHangMonitor::new(self.options.hang_expiry);
        let mut last_report = Instant::now();

        loop {
            // Reap finished attempts.
            let finished: Vec<TaskId> = running
                .iter()
                .filter(|(_, executor)| executor.stats().state().is_finished())
                .map(|(id, _)| *id)
                .collect();
            for task_id in finished {
                let Some(mut executor) = running.remove(&task_id) else {
                    continue;
                };
                monitor.remove(task_id);
                let snapshot = executor.stats().snapshot();
                match snapshot.state() {
                    State::Succeeded => {
                        tracing::debug!(
                            group = group_id.get(),
                            task = task_id.get(),
                            elapsed_ms = executor.started().elapsed().as_millis() as u64,
                            "Task succeeded"
                        );
                        executor.join();
                    }
                    State::Failed
                        if executor.supports_fail_over()
                            && executor.attempt() < fail_over.max_attempts =>
                    {
                        executor.shutdown();
                        let attempt = executor.attempt();
                        let delay = compute_retry_backoff(
                            Duration::from_millis(fail_over.retry_interval_ms),
                            Duration::from_millis(fail_over.max_wait_ms),
                            attempt,
                        );
                        tracing::warn!(
                            group = group_id.get(),
                            task = task_id.get(),
                            attempt,
                            max_attempts = fail_over.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            cause = snapshot.failure().map(ToString::to_string).as_deref(),
                            "Task failed, will retry"
                        );
                        // The group aggregate stays RUNNING through the backoff.
                        communicator.replace(task_id);
                        pending.push_back(PendingTask {
                            task: executor.task().clone(),
                            attempt: attempt + 1,
                            ready_at: Instant::now() + delay,
                        });
                    }
                    State::Killed if self.cancel.is_cancelled() => {
                        executor.shutdown();
                        return Err(EngineError::Killed);
                    }
                    _ => {
                        executor.shutdown();
                        let failure = snapshot.failure().cloned().unwrap_or_else(|| {
                            Failure::runtime(format!("task({task_id}) failed without a cause"))
                        });
                        tracing::error!(
                            group = group_id.get(),
                            task = task_id.get(),
                            attempt = executor.attempt(),
                            cause = %failure,
                            "Task failed, failing task group"
                        );
                        return Err(EngineError::Failed(failure));
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return Err(EngineError::Killed);
            }

            // Start ready tasks up to the channel budget.
            let now = Instant::now();
            while running.len() < self.plan.channel_number {
                let Some(index) = pending.iter().position(|p| p.ready_at <= now) else {
                    break;
                };
                let Some(next) = pending.remove(index) else {
                    break;
                };
                let task_id = next.task.task_id;
                let stats = communicator.register(task_id);
                let executor = TaskExecutor::start(ExecutorParams {
                    job: &self.job,
                    group_id,
                    task: &next.task,
                    attempt: next.attempt,
                    reader: &self.reader,
                    writer: &self.writer,
                    channel: self.options.channel,
                    max_dirty_logged: self.options.max_dirty_logged,
                    stats: stats.clone(),
                    parent_cancel: &self.cancel,
                });
                monitor.register(task_id, stats);
                running.insert(task_id, executor);
            }

            if pending.is_empty() && running.is_empty() {
                let done = communicator.collect();
                if done.state() == State::Succeeded {
                    return Ok(());
                }
            }

            // A task that failed since the reap pass is either requeued or fails
            // the group on the next tick; hold the report until then.
            if last_report.elapsed() >= report_interval {
                let progress = communicator.collect();
                if progress.state() != State::Failed {
                    self.reporter.report_task_group(group_id, progress);
                    last_report = Instant::now();
                }
            }

            for (task_id, executor) in running.iter() {
                monitor.report(*task_id, &executor.stats().snapshot());
            }

            sleep_cancellable(&self.cancel, tick);
        }
    }
}
