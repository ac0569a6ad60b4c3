//! Dirty-record collectors that feed a task's statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use conduit_sdk::TaskCollector;
use conduit_types::{Record, TaskGroupId, TaskId};

use crate::communicator::CommunicationHandle;

/// Which side of a task raised the dirty record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorRole {
    Reader,
    Writer,
}

impl CollectorRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Reader => "reader",
            Self::Writer => "writer",
        }
    }
}

/// Counts dirty records into the owning task's communication and logs a
/// bounded sample of them as JSON.
pub struct DirtyRecordCollector {
    role: CollectorRole,
    group_id: TaskGroupId,
    task_id: TaskId,
    stats: CommunicationHandle,
    max_logged: u64,
    logged: AtomicU64,
}

impl DirtyRecordCollector {
    pub fn new(
        role: CollectorRole,
        group_id: TaskGroupId,
        task_id: TaskId,
        stats: CommunicationHandle,
        max_logged: u64,
    ) -> Self {
        Self {
            role,
            group_id,
            task_id,
            stats,
            max_logged,
            logged: AtomicU64::new(0),
        }
    }
}

impl TaskCollector for DirtyRecordCollector {
    fn collect_dirty_record(
        &self,
        record: &Record,
        cause: Option<&(dyn std::error::Error + 'static)>,
        message: Option<&str>,
    ) {
        let bytes = record.byte_size() as u64;
        self.stats.update(|c| match self.role {
            CollectorRole::Reader => {
                c.counters.read_failed_records += 1;
                c.counters.read_failed_bytes += bytes;
            }
            CollectorRole::Writer => {
                c.counters.write_failed_records += 1;
                c.counters.write_failed_bytes += bytes;
            }
        });

        if self.logged.fetch_add(1, Ordering::Relaxed) >= self.max_logged {
            return;
        }
        let entry = serde_json::json!({
            "role": self.role.as_str(),
            "record": record,
            "cause": cause.map(ToString::to_string),
            "message": message,
        });
        tracing::warn!(
            group = self.group_id.get(),
            task = self.task_id.get(),
            role = self.role.as_str(),
            "Dirty record: {}",
            entry
        );
    }

    fn collect_message(&self, key: &str, value: &str) {
        self.stats.update(|c| c.add_message(key, value));
    }
}
