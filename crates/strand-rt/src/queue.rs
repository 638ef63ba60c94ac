// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Run queue: the running head plus a FIFO of ready tasks.
//!
//! The head is the task holding the CPU. Rotating moves the head to the
//! tail and promotes the first ready task, which gives round-robin
//! fairness among runnable tasks.

use std::collections::VecDeque;

use crate::task::{Task, TaskId};

#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    current: Option<Task>,
    ready: VecDeque<Task>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Task> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, task: Task) {
        self.current = Some(task);
    }

    /// Drop the running head from the queue (it is about to block, pause
    /// or die).
    pub fn take_current(&mut self) -> Option<Task> {
        self.current.take()
    }

    pub fn push_back(&mut self, task: Task) {
        self.ready.push_back(task);
    }

    pub fn push_front(&mut self, task: Task) {
        self.ready.push_front(task);
    }

    pub fn pop_ready(&mut self) -> Option<Task> {
        self.ready.pop_front()
    }

    /// Move the head to the tail and promote the next ready task. Returns
    /// the new head, or `None` (queue untouched) if nothing is ready.
    pub fn rotate(&mut self) -> Option<Task> {
        let next = self.ready.pop_front()?;
        if let Some(prev) = self.current.replace(next.clone()) {
            self.ready.push_back(prev);
        }
        Some(next)
    }

    /// Remove a ready task. The running head is left alone.
    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.ready.iter().position(|t| t.id() == id) {
            Some(idx) => {
                self.ready.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn is_ready(&self, id: TaskId) -> bool {
        self.ready.iter().any(|t| t.id() == id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.current.as_ref().is_some_and(|t| t.id() == id) || self.is_ready(id)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Runnable tasks, the running head included.
    pub fn len(&self) -> usize {
        self.ready.len() + usize::from(self.current.is_some())
    }

    #[cfg(test)]
    pub fn ready_ids(&self) -> Vec<TaskId> {
        self.ready.iter().map(Task::id).collect()
    }
}
