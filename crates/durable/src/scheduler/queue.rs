//! One actor's queue

use std::collections::VecDeque;

use uuid::Uuid;

use crate::task::QueryTask;

/// FIFO of an actor's tasks plus the runner flag
///
/// `ongoing` is only read and written under the scheduler's registry lock,
/// which makes it the mutual exclusion between concurrent runners.
#[derive(Default)]
pub(super) struct ActorQueue {
    tasks: VecDeque<QueryTask>,
    ongoing: bool,
    current: Option<Uuid>,
}

impl ActorQueue {
    pub(super) fn push(&mut self, task: QueryTask) {
        self.tasks.push_back(task);
    }

    /// Mark the queue as owned by a runner; false if it already was
    pub(super) fn claim(&mut self) -> bool {
        if self.ongoing {
            return false;
        }
        self.ongoing = true;
        true
    }

    /// Pop the head task and remember it as the one being stepped
    pub(super) fn start_next(&mut self) -> Option<QueryTask> {
        let task = self.tasks.pop_front()?;
        self.current = Some(task.id());
        Some(task)
    }

    pub(super) fn finish_current(&mut self) {
        self.current = None;
    }

    /// Whether the task is queued or being stepped
    pub(super) fn holds(&self, task_id: Uuid) -> bool {
        self.current == Some(task_id) || self.tasks.iter().any(|t| t.id() == task_id)
    }

    pub(super) fn is_ongoing(&self) -> bool {
        self.ongoing
    }

    pub(super) fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.current.is_none()
    }

    pub(super) fn len(&self) -> usize {
        self.tasks.len() + usize::from(self.current.is_some())
    }
}
