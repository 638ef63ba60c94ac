// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Observation hooks for switches and channel traffic.
//!
//! Callbacks run on the task that triggered the event, right before control
//! moves. They must not call back into the scheduler.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelId;
use crate::task::TaskId;

/// Why control moved from one task to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// `schedule()`: the caller went to the tail of the run queue.
    Yield,
    /// `schedule_remove()` / `run()`: the caller left the run queue.
    Remove,
    /// The caller blocked on a channel.
    Block,
    /// A channel preference handed the CPU to the woken partner.
    Handoff,
    /// `kill` / `raise_error` activated the target.
    Raise,
    /// `Task::run` jumped to the target.
    Run,
    /// The caller returned or was terminated.
    Finish,
    /// The caller failed; the target receives the error.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchEvent {
    pub from: TaskId,
    pub to: TaskId,
    pub reason: SwitchReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub task: TaskId,
    pub sending: bool,
    pub will_block: bool,
}

pub type SwitchCallback = Arc<dyn Fn(&SwitchEvent) + Send + Sync>;
pub type ChannelCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Hooks {
    on_switch: Mutex<Option<SwitchCallback>>,
    on_channel: Mutex<Option<ChannelCallback>>,
}

impl Hooks {
    pub fn set_switch(&self, cb: Option<SwitchCallback>) {
        *self.on_switch.lock() = cb;
    }

    pub fn set_channel(&self, cb: Option<ChannelCallback>) {
        *self.on_channel.lock() = cb;
    }

    pub fn switched(&self, event: &SwitchEvent) {
        let cb = self.on_switch.lock().clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }

    pub fn channel(&self, event: &ChannelEvent) {
        let cb = self.on_channel.lock().clone();
        if let Some(cb) = cb {
            cb(event);
        }
    }
}
