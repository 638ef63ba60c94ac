// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread-backed contexts.
//!
//! Each task gets a dedicated OS thread that sleeps on a baton until the
//! scheduler resumes it. Only the baton holder runs, so the threads never
//! execute task code in parallel; they exist to give every task its own
//! stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{Baton, ContextFactory, Entry, ExecutionContext};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::task::TaskId;

#[derive(Debug, Default)]
struct Flags {
    started: AtomicBool,
    killed: AtomicBool,
    finished: AtomicBool,
}

/// Context backed by a parked OS thread.
#[derive(Debug)]
pub struct ThreadContext {
    baton: Arc<Baton>,
    flags: Arc<Flags>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadContext {
    /// Spawn the backing thread. It parks until the first `resume`.
    pub fn spawn(name: String, stack_size: usize, entry: Entry) -> Result<Self> {
        let baton = Arc::new(Baton::new());
        let flags = Arc::new(Flags::default());

        let handle = {
            let baton = baton.clone();
            let flags = flags.clone();
            thread::Builder::new()
                .name(name)
                .stack_size(stack_size)
                .spawn(move || {
                    baton.wait();
                    if !flags.killed.load(Ordering::Acquire) {
                        entry();
                    }
                    flags.finished.store(true, Ordering::Release);
                })
                .map_err(|e| Error::Spawn(e.to_string()))?
        };

        Ok(Self {
            baton,
            flags,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_started(&self) -> bool {
        self.flags.started.load(Ordering::Acquire)
    }
}

impl ExecutionContext for ThreadContext {
    fn resume(&self) {
        self.flags.started.store(true, Ordering::Release);
        self.baton.signal();
    }

    fn suspend(&self) {
        self.baton.wait();
    }

    fn kill(&self) {
        if self.is_started() {
            return;
        }
        // Wake the parked thread so it exits without running the entry.
        self.flags.killed.store(true, Ordering::Release);
        self.baton.signal();
    }

    fn is_alive(&self) -> bool {
        !self.flags.killed.load(Ordering::Acquire) && !self.flags.finished.load(Ordering::Acquire)
    }

    fn finalize(&self) {
        if let Some(handle) = self.handle.lock().take() {
            // The entry catches panics from task code; a failed join means
            // the scheduler itself panicked, which it already reported.
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // A thread that never started would wait on its baton forever.
        if !self.is_started() {
            self.kill();
        }
    }
}

/// Default factory: one `ThreadContext` per task.
#[derive(Debug, Clone)]
pub struct ThreadContextFactory {
    prefix: String,
    stack_size: usize,
}

impl ThreadContextFactory {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
        }
    }
}

impl ContextFactory for ThreadContextFactory {
    fn create(&self, id: TaskId, entry: Entry) -> Result<Arc<dyn ExecutionContext>> {
        let name = format!("{}-{}", self.prefix, id.0);
        Ok(Arc::new(ThreadContext::spawn(name, self.stack_size, entry)?))
    }
}
