// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Tasks: identity, lifecycle flags, and the handle users hold.
//!
//! Lifecycle: created (callable stored, not alive) → `setup` (context bound,
//! alive, queued) → runs/blocks any number of times → dead on return,
//! uncaught failure, or kill. A dead task can be bound again and keeps its id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::channel::WaitList;
use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, Shared};

/// Body of a task. Arguments are whatever the closure captures.
pub type TaskFn = Box<dyn FnOnce(&Scheduler) -> Result<()> + Send + 'static>;

/// Process-wide task identity. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Mutable per-task bookkeeping. Guarded by the task's own lock; the
/// scheduler lock, when needed, is always taken first.
pub(crate) struct TaskSlot {
    pub name: Option<String>,
    pub func: Option<TaskFn>,
    pub context: Option<Arc<dyn ExecutionContext>>,
    pub alive: bool,
    /// Control has been switched into the context at least once.
    pub started: bool,
    /// Channel wait list this task is parked on.
    pub blocked_on: Option<Arc<dyn WaitList>>,
    /// Error to raise at the next resumption point (kill, failure of a
    /// dispatched task, deadlock).
    pub pending: Option<Error>,
    /// Task whose scheduling call last switched into this one.
    pub resumer: Option<Weak<TaskInner>>,
}

pub(crate) struct TaskInner {
    pub id: TaskId,
    pub is_main: bool,
    pub scheduler: Weak<Shared>,
    pub slot: Mutex<TaskSlot>,
}

/// Handle to a task. Clones refer to the same task.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl Task {
    pub(crate) fn new(scheduler: Weak<Shared>, func: Option<TaskFn>) -> Self {
        Self::build(scheduler, func, None, false)
    }

    pub(crate) fn new_main(scheduler: Weak<Shared>, context: Arc<dyn ExecutionContext>) -> Self {
        let task = Self::build(scheduler, None, Some(context), true);
        {
            let mut slot = task.slot();
            slot.alive = true;
            slot.started = true;
            slot.name = Some("main".to_string());
        }
        task
    }

    fn build(
        scheduler: Weak<Shared>,
        func: Option<TaskFn>,
        context: Option<Arc<dyn ExecutionContext>>,
        is_main: bool,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                is_main,
                scheduler,
                slot: Mutex::new(TaskSlot {
                    name: None,
                    func,
                    context,
                    alive: false,
                    started: false,
                    blocked_on: None,
                    pending: None,
                    resumer: None,
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TaskInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn slot(&self) -> MutexGuard<'_, TaskSlot> {
        self.inner.slot.lock()
    }

    pub(crate) fn downgrade(&self) -> Weak<TaskInner> {
        Arc::downgrade(&self.inner)
    }

    fn scheduler(&self) -> Result<Scheduler> {
        self.inner
            .scheduler
            .upgrade()
            .map(Scheduler::from_shared)
            .ok_or_else(|| Error::invalid(self.id(), "its scheduler has been dropped"))
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> Option<String> {
        self.slot().name.clone()
    }

    /// Attach a debug name, shown in logs and `Debug` output.
    pub fn set_name(&self, name: impl Into<String>) {
        self.slot().name = Some(name.into());
    }

    pub fn is_main(&self) -> bool {
        self.inner.is_main
    }

    pub fn is_alive(&self) -> bool {
        self.slot().alive
    }

    /// Parked on a channel wait list.
    pub fn is_blocked(&self) -> bool {
        self.slot().blocked_on.is_some()
    }

    /// Running, or waiting in the run queue.
    pub fn is_scheduled(&self) -> bool {
        self.scheduler()
            .map(|s| s.queue_contains(self.id()))
            .unwrap_or(false)
    }

    /// Alive but neither runnable nor blocked: taken out with `remove` or
    /// `schedule_remove` and waiting for `insert`.
    pub fn is_paused(&self) -> bool {
        self.is_alive() && !self.is_blocked() && !self.is_scheduled()
    }

    pub fn is_current(&self) -> bool {
        self.scheduler()
            .map(|s| s.current_task() == *self)
            .unwrap_or(false)
    }

    /// Store a new callable. Fails while the task is alive; a finished task
    /// is reset and can be bound again.
    pub fn bind<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(&Scheduler) -> Result<()> + Send + 'static,
    {
        let mut slot = self.slot();
        if slot.alive {
            return Err(Error::invalid(self.id(), "already bound to running code"));
        }
        slot.func = Some(Box::new(func));
        Ok(())
    }

    /// Bind an execution context to the stored callable, mark the task
    /// alive, and append it to the run queue.
    pub fn setup(&self) -> Result<Task> {
        self.scheduler()?.setup_task(self)?;
        Ok(self.clone())
    }

    /// Terminate the task. A task parked somewhere is switched to at once
    /// with `Error::TaskTerminated` raised at its suspension point; the
    /// caller continues after the victim unwinds. Tasks never started are
    /// discarded. No-op on dead tasks. Killing yourself returns
    /// `Err(TaskTerminated)` so the body unwinds with `?`.
    ///
    /// A victim woken by a completed send or receive finishes that operation
    /// first: the value stays delivered and `TaskTerminated` is raised at its
    /// next scheduling call instead.
    pub fn kill(&self) -> Result<()> {
        self.raise_error(Error::TaskTerminated)
    }

    /// Like `kill`, but raise `err` inside the task instead.
    pub fn raise_error(&self, err: Error) -> Result<()> {
        self.scheduler()?.raise_in(self, err)
    }

    /// Put a paused task back at the tail of the run queue.
    pub fn insert(&self) -> Result<()> {
        self.scheduler()?.insert_task(self)
    }

    /// Take a runnable task out of the run queue without killing it.
    pub fn remove(&self) -> Result<()> {
        self.scheduler()?.remove_task(self)
    }

    /// Switch to this runnable task now; the caller resumes right after it
    /// yields.
    pub fn run(&self) -> Result<()> {
        self.scheduler()?.run_task(self)
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot();
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &slot.name)
            .field("main", &self.inner.is_main)
            .field("alive", &slot.alive)
            .field("blocked", &slot.blocked_on.is_some())
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot().name.as_deref() {
            Some(name) => write!(f, "{}({})", self.inner.id, name),
            None => write!(f, "{}", self.inner.id),
        }
    }
}
