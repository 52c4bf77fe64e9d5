use std::rc::Weak;

use super::scheduler::SchedulerState;

/// Internal task identifier. Ids are never reused within one scheduler, so
/// stale timers and subscriptions can never resume a later task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        TaskId(raw)
    }
}

/// Owning handle to a spawned task.
///
/// A task starts running at spawn time and keeps running (across its
/// suspensions) as long as either this handle or the scheduler graph owns
/// it. Dropping a live handle cancels the task; [`Task::detach`] hands
/// ownership to the scheduler instead, which is the normal arrangement for
/// long-lived event loops.
#[must_use = "dropping a task handle cancels the task; call detach() to keep it running"]
pub struct Task {
    id: TaskId,
    state: Weak<SchedulerState>,
    detached: bool,
}

impl Task {
    pub(crate) fn new(id: TaskId, state: Weak<SchedulerState>) -> Self {
        Task {
            id,
            state,
            detached: false,
        }
    }

    /// Releases ownership to the scheduler. The task keeps running until it
    /// completes or the scheduler itself is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }

    /// True once the task has run to completion (or was cancelled, or its
    /// scheduler is gone).
    pub fn is_done(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => !state.contains_task(self.id),
            None => true,
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            state.remove_task(self.id);
        }
    }
}
