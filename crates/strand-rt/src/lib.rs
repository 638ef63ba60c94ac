// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand runtime: cooperative tasks talking over rendezvous channels.
//!
//! Tasks run one at a time and only give up control at explicit points
//! (`schedule`, blocking channel operations, kills, return). Channels are
//! unbuffered: a send completes when a receiver takes the value.
//!
//! Components:
//! - task: task handles and lifecycle (create, setup, kill, insert/remove)
//! - channel: synchronous channels with close/open and run preference
//! - scheduler: run queue, switching, failure routing, deadlock detection
//! - context: execution contexts behind tasks (thread-backed by default)
//! - hooks: switch and channel observation callbacks

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub(crate) mod queue;
pub mod scheduler;
pub mod task;

pub use channel::{Channel, ChannelId, Iter, Preference};
pub use config::SchedulerConfig;
pub use context::{ContextFactory, Entry, ExecutionContext, MainContext};
pub use error::{Error, Result};
pub use hooks::{ChannelEvent, SwitchEvent, SwitchReason};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{Task, TaskFn, TaskId};
