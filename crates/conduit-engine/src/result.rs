//! Job execution result types.

use conduit_types::error::KILLED_EXIT_CODE;
use conduit_types::{Communication, Failure, State};
use serde::Serialize;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(Failure),
    Killed,
}

/// Aggregate record/byte counts for a job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub records_read: u64,
    pub records_written: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub error_records: u64,
    pub error_bytes: u64,
}

/// Result of a job run.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: String,
    pub communication: Communication,
    pub duration_secs: f64,
    pub task_count: usize,
    pub task_group_count: usize,
}

impl JobResult {
    pub fn outcome(&self) -> JobOutcome {
        match self.communication.state() {
            State::Succeeded => JobOutcome::Succeeded,
            State::Killed => JobOutcome::Killed,
            State::Failed => JobOutcome::Failed(
                self.communication
                    .failure()
                    .cloned()
                    .unwrap_or_else(|| Failure::runtime("job failed without a recorded cause")),
            ),
            State::Running => {
                JobOutcome::Failed(Failure::runtime("job ended while still RUNNING"))
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == JobOutcome::Succeeded
    }

    /// Process exit status: 0 on success, the failure category's status on
    /// failure, 143 when killed.
    pub fn exit_code(&self) -> i32 {
        match self.outcome() {
            JobOutcome::Succeeded => 0,
            JobOutcome::Failed(failure) => failure.category.exit_code(),
            JobOutcome::Killed => KILLED_EXIT_CODE,
        }
    }

    pub fn counts(&self) -> JobCounts {
        let c = &self.communication.counters;
        JobCounts {
            records_read: c.total_read_records(),
            records_written: c.write_succeed_records(),
            bytes_read: c.total_read_bytes(),
            bytes_written: c.write_succeed_bytes(),
            error_records: c.total_error_records(),
            error_bytes: c.total_error_bytes(),
        }
    }

    /// Machine-readable summary printed after a run.
    pub fn to_json(&self) -> serde_json::Value {
        let counts = self.counts();
        serde_json::json!({
            "job": self.job,
            "state": self.communication.state(),
            "failure": self.communication.failure(),
            "exit_code": self.exit_code(),
            "records_read": counts.records_read,
            "records_written": counts.records_written,
            "bytes_read": counts.bytes_read,
            "bytes_written": counts.bytes_written,
            "error_records": counts.error_records,
            "error_bytes": counts.error_bytes,
            "wait_writer_secs": self.communication.counters.wait_writer_nanos as f64 / 1e9,
            "wait_reader_secs": self.communication.counters.wait_reader_nanos as f64 / 1e9,
            "duration_secs": self.duration_secs,
            "task_count": self.task_count,
            "task_group_count": self.task_group_count,
        })
    }
}
