//! Runs one reader task and one writer task against a shared channel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use conduit_sdk::{
    CancellationToken, ConnectorError, SinkConnector, SinkTask, SourceConnector, SourceTask,
    TaskCollector, TaskContext,
};
use conduit_types::{ErrorCategory, Failure, State, TaskGroupId, TaskId};

use crate::assign::TaskConfig;
use crate::channel::{Channel, ChannelConfig};
use crate::collector::{CollectorRole, DirtyRecordCollector};
use crate::communicator::CommunicationHandle;
use crate::exchanger::{BufferedReceiver, BufferedSender};

/// Everything needed to start one attempt of a task.
pub(crate) struct ExecutorParams<'a> {
    pub job: &'a str,
    pub group_id: TaskGroupId,
    pub task: &'a TaskConfig,
    pub attempt: u32,
    pub reader: &'a Arc<dyn SourceConnector>,
    pub writer: &'a Arc<dyn SinkConnector>,
    pub channel: ChannelConfig,
    pub max_dirty_logged: u64,
    pub stats: CommunicationHandle,
    pub parent_cancel: &'a CancellationToken,
}

/// A running reader/writer pair.
///
/// Each side runs `prepare`, its start method, and `post` on a dedicated
/// thread; `destroy` always runs. The attempt's communication turns
/// SUCCEEDED once both sides finish, or FAILED/KILLED with a cause as soon as
/// either side fails, in which case the channel is aborted so the peer
/// cannot block forever.
pub struct TaskExecutor {
    task: TaskConfig,
    group_id: TaskGroupId,
    attempt: u32,
    stats: CommunicationHandle,
    channel: Arc<Channel>,
    cancel: CancellationToken,
    supports_fail_over: bool,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
}

impl TaskExecutor {
    pub(crate) fn start(params: ExecutorParams<'_>) -> Self {
        let task_id = params.task.task_id;
        let cancel = params.parent_cancel.child_token();
        let channel = Arc::new(Channel::new(
            params.channel,
            params.stats.clone(),
            cancel.clone(),
        ));

        let mut executor = Self {
            task: params.task.clone(),
            group_id: params.group_id,
            attempt: params.attempt,
            stats: params.stats.clone(),
            channel: Arc::clone(&channel),
            cancel: cancel.clone(),
            supports_fail_over: false,
            threads: Vec::with_capacity(2),
            started: Instant::now(),
        };

        let writer_task = match params.writer.create_task(&params.task.writer) {
            Ok(task) => task,
            Err(e) => {
                executor.fail(Failure::new(ErrorCategory::PluginInit, format!("writer: {e}")));
                return executor;
            }
        };
        executor.supports_fail_over = writer_task.supports_fail_over();
        let reader_task = match params.reader.create_task(&params.task.reader) {
            Ok(task) => task,
            Err(e) => {
                executor.fail(Failure::new(ErrorCategory::PluginInit, format!("reader: {e}")));
                return executor;
            }
        };

        let collector = |role: CollectorRole| -> Arc<dyn TaskCollector> {
            Arc::new(DirtyRecordCollector::new(
                role,
                params.group_id,
                task_id,
                params.stats.clone(),
                params.max_dirty_logged,
            ))
        };
        let reader_collector = collector(CollectorRole::Reader);
        let reader_ctx = TaskContext::new(
            params.job,
            params.group_id,
            task_id,
            cancel.clone(),
            Arc::clone(&reader_collector),
        );
        let writer_ctx = TaskContext::new(
            params.job,
            params.group_id,
            task_id,
            cancel.clone(),
            collector(CollectorRole::Writer),
        );
        let remaining = Arc::new(AtomicU8::new(2));

        let side = Side {
            label: "writer",
            stats: params.stats.clone(),
            channel: Arc::clone(&channel),
            cancel: cancel.clone(),
            remaining: Arc::clone(&remaining),
        };
        let receiver = BufferedReceiver::new(Arc::clone(&channel));
        let spawned = std::thread::Builder::new()
            .name(format!("writer-{}-{}", params.group_id, task_id))
            .spawn(move || {
                let channel = Arc::clone(&side.channel);
                side.run(|| run_writer(writer_task, receiver, &channel, &writer_ctx));
            });
        match spawned {
            Ok(handle) => executor.threads.push(handle),
            Err(e) => {
                executor.fail(Failure::runtime(format!("failed to spawn writer thread: {e}")));
                return executor;
            }
        }

        let side = Side {
            label: "reader",
            stats: params.stats.clone(),
            channel: Arc::clone(&channel),
            cancel: cancel.clone(),
            remaining,
        };
        let sender = BufferedSender::new(Arc::clone(&channel), reader_collector);
        let spawned = std::thread::Builder::new()
            .name(format!("reader-{}-{}", params.group_id, task_id))
            .spawn(move || side.run(|| run_reader(reader_task, sender, &reader_ctx)));
        match spawned {
            Ok(handle) => executor.threads.push(handle),
            Err(e) => {
                executor.fail(Failure::runtime(format!("failed to spawn reader thread: {e}")));
                return executor;
            }
        }

        tracing::debug!(
            group = params.group_id.get(),
            task = task_id.get(),
            attempt = params.attempt,
            "Task executor started"
        );
        executor
    }

    fn fail(&self, failure: Failure) {
        tracing::error!(
            group = self.group_id.get(),
            task = self.task.task_id.get(),
            attempt = self.attempt,
            cause = %failure,
            "Task executor failed to start"
        );
        self.stats.mark_failed(failure);
        self.channel.abort();
    }

    pub fn task(&self) -> &TaskConfig {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.task_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn supports_fail_over(&self) -> bool {
        self.supports_fail_over
    }

    pub fn stats(&self) -> &CommunicationHandle {
        &self.stats
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Both threads have exited (or were never started).
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    /// Cancel both sides and abort the channel. Threads that have already
    /// exited are joined; threads still stuck in connector code are detached.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        self.channel.abort();
        for handle in self.threads.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::debug!(
                    group = self.group_id.get(),
                    task = self.task.task_id.get(),
                    "Detaching task thread still in connector code"
                );
            }
        }
    }

    /// Wait for both threads to exit.
    pub fn join(mut self) {
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

struct Side {
    label: &'static str,
    stats: CommunicationHandle,
    channel: Arc<Channel>,
    cancel: CancellationToken,
    remaining: Arc<AtomicU8>,
}

impl Side {
    fn run(self, body: impl FnOnce() -> Result<(), ConnectorError>) {
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => {
                self.stats.update(|c| c.counters.stage += 1);
                if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.stats.update(|c| c.set_state(State::Succeeded));
                }
            }
            Ok(Err(e)) => {
                if e.is_cancelled() && self.cancel.is_cancelled() {
                    self.stats.update(|c| {
                        c.set_failure(Failure::killed(format!("{} cancelled", self.label)));
                        c.set_state(State::Killed);
                    });
                } else {
                    tracing::error!(side = self.label, error = %e, "Task side failed");
                    self.stats.mark_failed(Failure::new(
                        ErrorCategory::PluginRuntime,
                        format!("{}: {}", self.label, e),
                    ));
                }
                self.channel.abort();
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(side = self.label, panic = %message, "Task side panicked");
                self.stats.mark_failed(Failure::runtime(format!(
                    "{} panicked: {}",
                    self.label, message
                )));
                self.channel.abort();
            }
        }
    }
}

fn run_reader(
    mut task: Box<dyn SourceTask>,
    mut sender: BufferedSender,
    ctx: &TaskContext,
) -> Result<(), ConnectorError> {
    let result = read_phases(task.as_mut(), &mut sender, ctx);
    if let Err(e) = task.destroy() {
        tracing::warn!(task = ctx.task_id().get(), error = %e, "Reader destroy failed");
    }
    result
}

fn read_phases(
    task: &mut dyn SourceTask,
    sender: &mut BufferedSender,
    ctx: &TaskContext,
) -> Result<(), ConnectorError> {
    task.prepare(ctx)?;
    task.start_read(sender, ctx)?;
    conduit_sdk::RecordSender::terminate(sender)?;
    task.post(ctx)
}

fn run_writer(
    mut task: Box<dyn SinkTask>,
    mut receiver: BufferedReceiver,
    channel: &Channel,
    ctx: &TaskContext,
) -> Result<(), ConnectorError> {
    let result = write_phases(task.as_mut(), &mut receiver, channel, ctx);
    if let Err(e) = task.destroy() {
        tracing::warn!(task = ctx.task_id().get(), error = %e, "Writer destroy failed");
    }
    result
}

fn write_phases(
    task: &mut dyn SinkTask,
    receiver: &mut BufferedReceiver,
    channel: &Channel,
    ctx: &TaskContext,
) -> Result<(), ConnectorError> {
    task.prepare(ctx)?;
    task.start_write(receiver, ctx)?;
    if !channel.is_closed() {
        return Err(ConnectorError::internal(
            "WRITER_EARLY_EXIT",
            "writer returned before the reader terminated the stream",
        ));
    }
    task.post(ctx)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
