//! Per-task statistics handles and their group-level roll-up.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use conduit_types::{Communication, Failure, State, TaskId};

/// Shared, lock-protected [`Communication`] for one task attempt.
///
/// The owning task's threads write through [`CommunicationHandle::update`];
/// every other reader works on a [`CommunicationHandle::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct CommunicationHandle {
    inner: Arc<Mutex<Communication>>,
}

impl CommunicationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` under the lock.
    pub fn update<R>(&self, f: impl FnOnce(&mut Communication) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Immutable copy taken under the lock.
    pub fn snapshot(&self) -> Communication {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn state(&self) -> State {
        self.update(|c| c.state())
    }

    pub fn mark_failed(&self, failure: Failure) {
        self.update(|c| c.mark_failed(failure));
    }

    pub fn reset(&self) {
        self.update(Communication::reset);
    }
}

/// Task-level handles of one task group, keyed by task id.
#[derive(Debug, Default)]
pub struct TaskGroupCommunicator {
    tasks: BTreeMap<TaskId, CommunicationHandle>,
}

impl TaskGroupCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `task_id`, created RUNNING on first use.
    pub fn register(&mut self, task_id: TaskId) -> CommunicationHandle {
        self.tasks.entry(task_id).or_default().clone()
    }

    /// Install a fresh RUNNING handle for a new attempt of `task_id`.
    ///
    /// Threads of the previous attempt keep their old handle, so late
    /// updates from them no longer reach the group aggregate.
    pub fn replace(&mut self, task_id: TaskId) -> CommunicationHandle {
        let handle = CommunicationHandle::new();
        self.tasks.insert(task_id, handle.clone());
        handle
    }

    pub fn get(&self, task_id: TaskId) -> Option<&CommunicationHandle> {
        self.tasks.get(&task_id)
    }

    pub fn snapshot(&self, task_id: TaskId) -> Option<Communication> {
        self.tasks.get(&task_id).map(CommunicationHandle::snapshot)
    }

    /// Merge snapshots of every task into the group aggregate.
    pub fn collect(&self) -> Communication {
        let snapshots: Vec<Communication> =
            self.tasks.values().map(CommunicationHandle::snapshot).collect();
        let mut merged = Communication::merge_all(&snapshots);
        merged.touch();
        merged
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::ErrorCategory;

    #[test]
    fn test_handle_snapshot_is_detached() {
        let handle = CommunicationHandle::new();
        handle.update(|c| c.counters.read_succeed_records = 4);
        let snap = handle.snapshot();
        handle.update(|c| c.counters.read_succeed_records = 9);
        assert_eq!(snap.counters.read_succeed_records, 4);
        assert_eq!(handle.snapshot().counters.read_succeed_records, 9);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut comm = TaskGroupCommunicator::new();
        let a = comm.register(TaskId::new(1));
        a.update(|c| c.counters.stage = 1);
        let b = comm.register(TaskId::new(1));
        assert_eq!(b.snapshot().counters.stage, 1);
        assert_eq!(comm.len(), 1);
    }

    #[test]
    fn test_collect_merges_tasks() {
        let mut comm = TaskGroupCommunicator::new();
        let a = comm.register(TaskId::new(0));
        let b = comm.register(TaskId::new(1));
        a.update(|c| {
            c.counters.read_succeed_records = 10;
            c.set_state(State::Succeeded);
        });
        b.update(|c| c.counters.read_succeed_records = 5);

        let merged = comm.collect();
        assert_eq!(merged.counters.read_succeed_records, 15);
        assert_eq!(merged.state(), State::Running);

        b.update(|c| c.set_state(State::Succeeded));
        assert_eq!(comm.collect().state(), State::Succeeded);
    }

    #[test]
    fn test_failed_task_fails_group_aggregate() {
        let mut comm = TaskGroupCommunicator::new();
        comm.register(TaskId::new(0)).update(|c| c.set_state(State::Succeeded));
        comm.register(TaskId::new(1))
            .mark_failed(Failure::new(ErrorCategory::PluginRuntime, "boom"));
        let merged = comm.collect();
        assert_eq!(merged.state(), State::Failed);
        assert_eq!(merged.failure().unwrap().message, "boom");
    }

    #[test]
    fn test_replace_detaches_old_attempt() {
        let mut comm = TaskGroupCommunicator::new();
        let old = comm.register(TaskId::new(0));
        old.mark_failed(Failure::runtime("first attempt"));
        let fresh = comm.replace(TaskId::new(0));
        old.update(|c| c.counters.read_succeed_records = 99);

        assert_eq!(fresh.state(), State::Running);
        let merged = comm.collect();
        assert_eq!(merged.state(), State::Running);
        assert_eq!(merged.counters.read_succeed_records, 0);
        assert_eq!(comm.len(), 1);
    }

    #[test]
    fn test_reset_handle() {
        let handle = CommunicationHandle::new();
        handle.mark_failed(Failure::runtime("x"));
        handle.reset();
        assert_eq!(handle.state(), State::Running);
        assert!(handle.snapshot().failure().is_none());
    }
}
