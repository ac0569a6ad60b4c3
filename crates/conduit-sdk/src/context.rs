//! Per-task context handed to connector tasks.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_types::{Record, TaskGroupId, TaskId};

pub use tokio_util::sync::CancellationToken;

/// Longest single nap [`sleep_cancellable`] takes before re-checking the token.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Sleep for `duration` or until `token` is cancelled. Returns `true` if
/// cancelled.
pub fn sleep_cancellable(token: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if token.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Sink for dirty records and free-form messages raised by a task.
///
/// Implementations funnel everything into the task's statistics; collecting
/// a dirty record never fails the task by itself.
pub trait TaskCollector: Send + Sync {
    fn collect_dirty_record(
        &self,
        record: &Record,
        cause: Option<&(dyn std::error::Error + 'static)>,
        message: Option<&str>,
    );

    fn collect_message(&self, key: &str, value: &str);
}

/// Identity and services available to a running task.
#[derive(Clone)]
pub struct TaskContext {
    job: String,
    group_id: TaskGroupId,
    task_id: TaskId,
    cancel: CancellationToken,
    collector: Arc<dyn TaskCollector>,
}

impl TaskContext {
    pub fn new(
        job: impl Into<String>,
        group_id: TaskGroupId,
        task_id: TaskId,
        cancel: CancellationToken,
        collector: Arc<dyn TaskCollector>,
    ) -> Self {
        Self {
            job: job.into(),
            group_id,
            task_id,
            cancel,
            collector,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn group_id(&self) -> TaskGroupId {
        self.group_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn collector(&self) -> &dyn TaskCollector {
        self.collector.as_ref()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("job", &self.job)
            .field("group_id", &self.group_id)
            .field("task_id", &self.task_id)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}
