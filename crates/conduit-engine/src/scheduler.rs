//! Job scheduler: starts every task group, polls the aggregate, and enforces
//! the dirty-record limit and kill requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use conduit_sdk::{sleep_cancellable, CancellationToken, SinkConnector, SourceConnector};
use conduit_types::{Communication, Failure, State, TaskGroupId};

use crate::assign::TaskGroupPlan;
use crate::config::types::SchedulerConfig;
use crate::error_limit::ErrorRecordChecker;
use crate::report::{JobReport, ReportTable, Reporter};
use crate::task_group::{TaskGroupContainer, TaskGroupOptions};

/// Requests cancellation of a running job from another thread.
#[derive(Debug, Clone, Default)]
pub struct KillHandle {
    token: CancellationToken,
}

impl KillHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        tracing::warn!("Kill requested");
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Runs task groups on their own threads and turns their reports into a job
/// outcome.
pub struct JobScheduler {
    config: SchedulerConfig,
    checker: ErrorRecordChecker,
    kill: KillHandle,
    table: Arc<ReportTable>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, checker: ErrorRecordChecker, kill: KillHandle) -> Self {
        Self {
            config,
            checker,
            kill,
            table: Arc::new(ReportTable::default()),
        }
    }

    /// Latest job-level progress report, if one has been produced.
    pub fn last_report(&self) -> Option<JobReport> {
        self.table.last_job_report()
    }

    /// Run `plans` to completion and return the final job communication.
    ///
    /// The returned communication is SUCCEEDED only if every group
    /// succeeded and the record limit held throughout.
    pub fn run(
        &mut self,
        job: &str,
        plans: Vec<TaskGroupPlan>,
        reader: &Arc<dyn SourceConnector>,
        writer: &Arc<dyn SinkConnector>,
        options: &TaskGroupOptions,
    ) -> Communication {
        let total_stage: u64 = plans.iter().map(|p| p.tasks.len() as u64 * 2).sum();
        self.table = Arc::new(ReportTable::new(plans.iter().map(|p| p.group_id)));
        let groups_cancel = self.kill.token().child_token();
        tracing::info!(
            job,
            task_groups = plans.len(),
            total_stage,
            "Scheduling task groups"
        );

        let mut handles: BTreeMap<TaskGroupId, JoinHandle<Communication>> = BTreeMap::new();
        for plan in plans {
            let group_id = plan.group_id;
            let reporter: Arc<dyn Reporter> = Arc::clone(&self.table) as Arc<dyn Reporter>;
            let container = TaskGroupContainer::new(
                job,
                plan,
                Arc::clone(reader),
                Arc::clone(writer),
                options.clone(),
                reporter,
                groups_cancel.clone(),
            );
            let spawned = std::thread::Builder::new()
                .name(format!("taskgroup-{group_id}"))
                .spawn(move || container.start());
            match spawned {
                Ok(handle) => {
                    handles.insert(group_id, handle);
                }
                Err(e) => {
                    let failure =
                        Failure::runtime(format!("failed to spawn task group {group_id}: {e}"));
                    let mut failed = Communication::new();
                    failed.mark_failed(failure);
                    self.table.report_task_group(group_id, failed);
                }
            }
        }

        let tick = Duration::from_millis(self.config.sleep_interval_ms.max(1));
        let report_interval = Duration::from_millis(self.config.report_interval_ms);
        let mut last = Communication::succeeded();
        last.set_timestamp_ms(chrono::Utc::now().timestamp_millis());
        let mut last_report_at = Instant::now();

        loop {
            self.reap_groups(&mut handles);

            let mut now = self.table.collect();
            now.touch();

            if last_report_at.elapsed() >= report_interval {
                let report = JobReport::from_delta(&now, &last, total_stage);
                tracing::info!("{}", report);
                self.table.report_job(&report);
                last = now.clone();
                last_report_at = Instant::now();
            }

            if let Err(e) = self.checker.check_record_limit(&now) {
                tracing::error!(error = %e, "Dirty record limit exceeded, stopping job");
                groups_cancel.cancel();
                self.join_groups(handles);
                let mut head = Communication::succeeded();
                head.mark_failed(e.to_failure());
                return head.merge(&self.table.collect());
            }

            match now.state() {
                State::Succeeded => {
                    self.join_groups(handles);
                    let mut done = self.table.collect();
                    done.touch();
                    return done;
                }
                State::Failed => {
                    let cause = now.failure().cloned().unwrap_or_else(|| {
                        Failure::runtime("task group failed without a cause")
                    });
                    tracing::error!(cause = %cause, "Task group failed, stopping job");
                    groups_cancel.cancel();
                    self.join_groups(handles);
                    // Cancelled siblings report KILLED causes; the root cause leads.
                    let mut head = Communication::succeeded();
                    head.mark_failed(cause);
                    let mut failed = head.merge(&self.table.collect());
                    failed.touch();
                    return failed;
                }
                State::Running | State::Killed => {}
            }

            if self.kill.is_killed() {
                self.join_groups(handles);
                let mut head = Communication::succeeded();
                head.set_failure(Failure::killed("job killed on request"));
                let mut killed = head.merge(&self.table.collect());
                killed.force_state(State::Killed);
                return killed;
            }

            sleep_cancellable(self.kill.token(), tick);
        }
    }

    /// Join group threads that have exited; a panicked group is reported
    /// FAILED in its place.
    fn reap_groups(&self, handles: &mut BTreeMap<TaskGroupId, JoinHandle<Communication>>) {
        let finished: Vec<TaskGroupId> = handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for group_id in finished {
            if let Some(handle) = handles.remove(&group_id) {
                self.join_group(group_id, handle);
            }
        }
    }

    fn join_groups(&self, handles: BTreeMap<TaskGroupId, JoinHandle<Communication>>) {
        for (group_id, handle) in handles {
            self.join_group(group_id, handle);
        }
    }

    fn join_group(&self, group_id: TaskGroupId, handle: JoinHandle<Communication>) {
        if handle.join().is_err() {
            tracing::error!(group = group_id.get(), "Task group thread panicked");
            let mut failed = self.table.group(group_id).unwrap_or_default();
            failed.mark_failed(Failure::runtime(format!("task group {group_id} panicked")));
            self.table.report_task_group(group_id, failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::TaskConfig;
    use crate::channel::ChannelConfig;
    use crate::config::types::{ErrorLimitConfig, TaskGroupConfig};
    use conduit_sdk::{ConnectorError, RecordReceiver, RecordSender, SinkTask, SourceTask, TaskContext};
    use conduit_types::{Column, ErrorCategory, Record, TaskId};

    struct Source {
        rows: i64,
        bad_every: Option<i64>,
        endless: bool,
    }

    impl SourceConnector for Source {
        fn split(&self, advice: usize) -> Result<Vec<serde_json::Value>, ConnectorError> {
            Ok(vec![serde_json::json!({}); advice])
        }

        fn create_task(&self, _p: &serde_json::Value) -> Result<Box<dyn SourceTask>, ConnectorError> {
            Ok(Box::new(SourceRun {
                rows: self.rows,
                bad_every: self.bad_every,
                endless: self.endless,
            }))
        }
    }

    struct SourceRun {
        rows: i64,
        bad_every: Option<i64>,
        endless: bool,
    }

    impl SourceTask for SourceRun {
        fn start_read(&mut self, sender: &mut dyn RecordSender, ctx: &TaskContext) -> Result<(), ConnectorError> {
            let mut i = 0;
            while self.endless || i < self.rows {
                if ctx.is_cancelled() {
                    return Err(ConnectorError::cancelled("CANCELLED", "reader cancelled"));
                }
                let record = Record::from(vec![Column::Long(i)]);
                match self.bad_every {
                    Some(n) if i % n == 0 => {
                        ctx.collector().collect_dirty_record(&record, None, Some("bad row"));
                    }
                    _ => sender.send_to_writer(record)?,
                }
                i += 1;
                if self.endless {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Ok(())
        }
    }

    struct Sink;

    impl SinkConnector for Sink {
        fn split(&self, mandatory: usize) -> Result<Vec<serde_json::Value>, ConnectorError> {
            Ok(vec![serde_json::json!({}); mandatory])
        }

        fn create_task(&self, _p: &serde_json::Value) -> Result<Box<dyn SinkTask>, ConnectorError> {
            Ok(Box::new(SinkRun))
        }
    }

    struct SinkRun;

    impl SinkTask for SinkRun {
        fn start_write(&mut self, receiver: &mut dyn RecordReceiver, _ctx: &TaskContext) -> Result<(), ConnectorError> {
            while receiver.get_from_reader()?.is_some() {}
            Ok(())
        }
    }

    fn plans(groups: u32, tasks_per_group: u32) -> Vec<TaskGroupPlan> {
        (0..groups)
            .map(|g| TaskGroupPlan {
                group_id: TaskGroupId::new(g),
                channel_number: 2,
                tasks: (0..tasks_per_group)
                    .map(|t| TaskConfig {
                        task_id: TaskId::new(g * tasks_per_group + t),
                        reader: serde_json::json!({}),
                        writer: serde_json::json!({}),
                    })
                    .collect(),
            })
            .collect()
    }

    fn options() -> TaskGroupOptions {
        TaskGroupOptions {
            channel: ChannelConfig {
                capacity: 32,
                buffer_size: 8,
                wait_tick: Duration::from_millis(10),
                ..ChannelConfig::default()
            },
            task_group: TaskGroupConfig {
                sleep_interval_ms: 5,
                report_interval_ms: 10,
                ..TaskGroupConfig::default()
            },
            hang_expiry: Duration::from_secs(60),
            max_dirty_logged: 2,
        }
    }

    fn scheduler(record_limit: Option<u64>, kill: KillHandle) -> JobScheduler {
        JobScheduler::new(
            SchedulerConfig {
                sleep_interval_ms: 5,
                report_interval_ms: 10,
            },
            ErrorRecordChecker::new(&ErrorLimitConfig {
                record: record_limit,
                percentage: None,
            }),
            kill,
        )
    }

    fn connectors(source: Source) -> (Arc<dyn SourceConnector>, Arc<dyn SinkConnector>) {
        (Arc::new(source), Arc::new(Sink))
    }

    #[test]
    fn test_all_groups_succeed() {
        let (reader, writer) = connectors(Source {
            rows: 50,
            bad_every: None,
            endless: false,
        });
        let mut scheduler = scheduler(Some(0), KillHandle::new());
        let comm = scheduler.run("test", plans(2, 3), &reader, &writer, &options());
        assert_eq!(comm.state(), State::Succeeded);
        assert_eq!(comm.counters.read_succeed_records, 300);
        assert_eq!(comm.counters.write_received_records, 300);
        assert_eq!(comm.counters.stage, 12);
    }

    #[test]
    fn test_record_limit_fails_job_with_limit_cause() {
        let (reader, writer) = connectors(Source {
            rows: 50,
            bad_every: Some(10),
            endless: false,
        });
        let mut scheduler = scheduler(Some(0), KillHandle::new());
        let comm = scheduler.run("test", plans(1, 2), &reader, &writer, &options());
        assert_eq!(comm.state(), State::Failed);
        assert_eq!(
            comm.failure().unwrap().category,
            ErrorCategory::DirtyDataLimitExceeded
        );
    }

    #[test]
    fn test_kill_returns_killed() {
        let (reader, writer) = connectors(Source {
            rows: 0,
            bad_every: None,
            endless: true,
        });
        let kill = KillHandle::new();
        let remote = kill.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            remote.kill();
        });
        let mut scheduler = scheduler(None, kill);
        let comm = scheduler.run("test", plans(2, 1), &reader, &writer, &options());
        killer.join().unwrap();
        assert_eq!(comm.state(), State::Killed);
        assert_eq!(comm.failure().unwrap().category, ErrorCategory::Killed);
        assert!(comm.counters.read_succeed_records > 0);
    }

    #[test]
    fn test_progress_reports_are_recorded() {
        let (reader, writer) = connectors(Source {
            rows: 0,
            bad_every: None,
            endless: true,
        });
        let kill = KillHandle::new();
        let remote = kill.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(80));
            remote.kill();
        });
        let mut scheduler = scheduler(None, kill);
        scheduler.run("test", plans(1, 1), &reader, &writer, &options());
        killer.join().unwrap();
        let report = scheduler.last_report().unwrap();
        assert!(report.percentage < 1.0);
    }

    /// Sink whose tasks fail when their params carry `"fail": true`.
    struct PickySink;

    impl SinkConnector for PickySink {
        fn split(&self, mandatory: usize) -> Result<Vec<serde_json::Value>, ConnectorError> {
            Ok(vec![serde_json::json!({}); mandatory])
        }

        fn create_task(&self, p: &serde_json::Value) -> Result<Box<dyn SinkTask>, ConnectorError> {
            Ok(Box::new(PickySinkRun {
                fail: p["fail"] == true,
            }))
        }
    }

    struct PickySinkRun {
        fail: bool,
    }

    impl SinkTask for PickySinkRun {
        fn start_write(&mut self, receiver: &mut dyn RecordReceiver, _ctx: &TaskContext) -> Result<(), ConnectorError> {
            if self.fail {
                return Err(ConnectorError::io("WRITE_FAILED", "disk gone"));
            }
            while receiver.get_from_reader()?.is_some() {}
            Ok(())
        }
    }

    #[test]
    fn test_group_failure_cause_survives_sibling_cancel() {
        let reader: Arc<dyn SourceConnector> = Arc::new(Source {
            rows: 0,
            bad_every: None,
            endless: true,
        });
        let writer: Arc<dyn SinkConnector> = Arc::new(PickySink);
        let mut plans = plans(2, 1);
        plans[1].tasks[0].writer = serde_json::json!({ "fail": true });

        let mut scheduler = scheduler(None, KillHandle::new());
        let comm = scheduler.run("test", plans, &reader, &writer, &options());

        assert_eq!(comm.state(), State::Failed);
        let cause = comm.failure().unwrap();
        assert_eq!(cause.category, ErrorCategory::PluginRuntime);
        assert!(cause.message.contains("disk gone"), "{}", cause.message);
    }
}
