// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution contexts: the resumable units of control behind tasks.
//!
//! The scheduler never touches stacks itself. It asks a `ContextFactory`
//! for one context per task and moves control between them with
//! `switch`. Exactly one context is resumed at any time; everyone else is
//! parked in `suspend`.
//!
//! - `thread`: default factory, one parked OS thread per task

pub mod thread;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::task::TaskId;

pub use self::thread::{ThreadContext, ThreadContextFactory};

/// Body run the first time a context is resumed.
pub type Entry = Box<dyn FnOnce() + Send + 'static>;

/// A resumable unit of control.
pub trait ExecutionContext: Send + Sync + fmt::Debug {
    /// Let this context run. Starts it on the first call.
    fn resume(&self);

    /// Park the calling context until someone resumes it.
    fn suspend(&self);

    /// Discard a context that was never resumed. Started contexts are
    /// unwound by the scheduler instead, so this is a no-op for them.
    fn kill(&self);

    fn is_alive(&self) -> bool;

    /// Reclaim resources once the context is dead.
    fn finalize(&self) {}

    /// Transfer control from `from` (the caller) to `self`.
    fn switch(&self, from: &dyn ExecutionContext) {
        self.resume();
        from.suspend();
    }
}

/// Produces contexts for tasks.
pub trait ContextFactory: Send + Sync {
    /// Context for a new task; `entry` runs when it is first resumed.
    fn create(&self, id: TaskId, entry: Entry) -> Result<Arc<dyn ExecutionContext>>;

    /// Context standing for the caller that owns the scheduler.
    fn main_context(&self) -> Arc<dyn ExecutionContext> {
        Arc::new(MainContext::new())
    }
}

/// One-shot wakeup token. A `signal` that arrives before `wait` is kept,
/// so a switch back can never be lost.
#[derive(Debug, Default)]
pub(crate) struct Baton {
    ready: Mutex<bool>,
    cvar: Condvar,
}

impl Baton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        self.cvar.notify_one();
    }

    pub fn wait(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.cvar.wait(&mut ready);
        }
        *ready = false;
    }
}

/// Context of the scheduler's owner. It is already running, so it has no
/// entry and never dies.
#[derive(Debug, Default)]
pub struct MainContext {
    baton: Baton,
}

impl MainContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionContext for MainContext {
    fn resume(&self) {
        self.baton.signal();
    }

    fn suspend(&self) {
        self.baton.wait();
    }

    fn kill(&self) {}

    fn is_alive(&self) -> bool {
        true
    }
}
