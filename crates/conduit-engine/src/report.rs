//! Progress reporting: the reporter seam, the in-process report table, and
//! job-level delta reports.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use conduit_types::{Communication, Counters, Failure, State, TaskGroupId};
use serde::Serialize;

/// Destination of task-group and job progress.
///
/// Calls are fire-and-forget and must not block the caller for long.
pub trait Reporter: Send + Sync {
    fn report_task_group(&self, group_id: TaskGroupId, communication: Communication);

    fn report_job(&self, report: &JobReport);
}

/// In-memory table of the latest communication per task group.
#[derive(Debug, Default)]
pub struct ReportTable {
    groups: Mutex<BTreeMap<TaskGroupId, Communication>>,
    last_job: Mutex<Option<JobReport>>,
}

impl ReportTable {
    /// A table seeded with a RUNNING entry for every group, so the job never
    /// looks finished before each group has reported.
    pub fn new(group_ids: impl IntoIterator<Item = TaskGroupId>) -> Self {
        let groups = group_ids
            .into_iter()
            .map(|id| (id, Communication::new()))
            .collect();
        Self {
            groups: Mutex::new(groups),
            last_job: Mutex::new(None),
        }
    }

    /// Merge the latest communication of every group.
    pub fn collect(&self) -> Communication {
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Communication::merge_all(groups.values())
    }

    pub fn group(&self, group_id: TaskGroupId) -> Option<Communication> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&group_id)
            .cloned()
    }

    pub fn last_job_report(&self) -> Option<JobReport> {
        self.last_job
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Reporter for ReportTable {
    fn report_task_group(&self, group_id: TaskGroupId, communication: Communication) {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group_id, communication);
    }

    fn report_job(&self, report: &JobReport) {
        *self.last_job.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }
}

/// Job progress derived from the current and the last reported aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub state: State,
    pub failure: Option<Failure>,
    pub counters: Counters,
    pub byte_speed: u64,
    pub record_speed: u64,
    /// Completed stages over total stages, in `0.0..=1.0`.
    pub percentage: f64,
    pub timestamp_ms: i64,
}

impl JobReport {
    /// Compute speeds over the interval between `last` and `now`.
    ///
    /// Intervals of a second or less count as one second.
    pub fn from_delta(now: &Communication, last: &Communication, total_stage: u64) -> Self {
        let interval_ms = now.timestamp_ms().saturating_sub(last.timestamp_ms()).max(0) as u64;
        let secs = (interval_ms / 1000).max(1);
        let bytes = now
            .counters
            .total_read_bytes()
            .saturating_sub(last.counters.total_read_bytes());
        let records = now
            .counters
            .total_read_records()
            .saturating_sub(last.counters.total_read_records());
        let percentage = if total_stage == 0 {
            0.0
        } else {
            (now.counters.stage as f64 / total_stage as f64).min(1.0)
        };
        Self {
            state: now.state(),
            failure: now.failure().cloned(),
            counters: now.counters,
            byte_speed: bytes / secs,
            record_speed: records / secs,
            percentage,
            timestamp_ms: now.timestamp_ms(),
        }
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total {} records, {} bytes | Speed {}/s, {} records/s | Error {} records, {} bytes | \
             All Task WaitWriterTime {:.3}s | All Task WaitReaderTime {:.3}s | Percentage {:.2}%",
            self.counters.total_read_records(),
            self.counters.total_read_bytes(),
            format_bytes(self.byte_speed),
            self.record_speed,
            self.counters.total_error_records(),
            self.counters.total_error_bytes(),
            self.counters.wait_writer_nanos as f64 / 1e9,
            self.counters.wait_reader_nanos as f64 / 1e9,
            self.percentage * 100.0,
        )
    }
}

/// Human-readable byte size with binary units, e.g. `1.50KB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.2}GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.2}MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.2}KB", bytes as f64 / 1024.0)
    } else {
        format!("{}B", bytes)
    }
}
