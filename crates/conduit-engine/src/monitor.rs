//! Watchdog for tasks that are alive but make no read progress.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use conduit_types::{Communication, ErrorCategory, Failure, TaskId};

use crate::communicator::CommunicationHandle;

#[derive(Debug)]
struct Watched {
    handle: CommunicationHandle,
    last_read: u64,
    last_progress: Instant,
}

/// Flags a task FAILED when its total read count stalls past `expiry`.
///
/// Owned by one task group. It only flips task state; the group's normal
/// failure handling performs the shutdown.
#[derive(Debug)]
pub struct TaskHangMonitor {
    expiry: Duration,
    tasks: BTreeMap<TaskId, Watched>,
}

impl TaskHangMonitor {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            tasks: BTreeMap::new(),
        }
    }

    /// Start watching a task attempt. Re-registering restarts its clock.
    pub fn register(&mut self, task_id: TaskId, handle: CommunicationHandle) {
        self.register_at(task_id, handle, Instant::now());
    }

    pub(crate) fn register_at(&mut self, task_id: TaskId, handle: CommunicationHandle, now: Instant) {
        let last_read = handle.snapshot().total_read_records();
        self.tasks.insert(
            task_id,
            Watched {
                handle,
                last_read,
                last_progress: now,
            },
        );
    }

    pub fn remove(&mut self, task_id: TaskId) {
        self.tasks.remove(&task_id);
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Feed the latest snapshot of `task_id`. Returns `true` if the task was
    /// just marked hung.
    pub fn report(&mut self, task_id: TaskId, snapshot: &Communication) -> bool {
        self.report_at(task_id, snapshot, Instant::now())
    }

    pub(crate) fn report_at(&mut self, task_id: TaskId, snapshot: &Communication, now: Instant) -> bool {
        let Some(watched) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if snapshot.state().is_finished() {
            return false;
        }
        let read = snapshot.total_read_records();
        if read != watched.last_read {
            watched.last_read = read;
            watched.last_progress = now;
            return false;
        }
        let elapsed = now.saturating_duration_since(watched.last_progress);
        if elapsed <= self.expiry {
            return false;
        }
        let message = format!(
            "task({}) hung expired [allReadRecord({}), elapsed({})]",
            task_id,
            read,
            elapsed.as_millis()
        );
        tracing::warn!(task = task_id.get(), "{}", message);
        watched
            .handle
            .mark_failed(Failure::new(ErrorCategory::Runtime, message));
        true
    }
}
