// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.

use thiserror::Error;

use crate::channel::ChannelId;
use crate::task::TaskId;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything a scheduling or channel operation can fail with.
///
/// Task bodies return `Result<(), Error>` too, so application failures travel
/// through the same type (`Error::Raised`).
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted on a task in the wrong lifecycle state.
    #[error("task {task}: {reason}")]
    InvalidState { task: TaskId, reason: &'static str },

    /// Send or receive on a channel that no longer accepts waiters.
    #[error("channel {channel} is closed")]
    ChannelClosed { channel: ChannelId },

    /// Cancellation signal raised inside a killed task.
    #[error("task was terminated")]
    TaskTerminated,

    /// A task dispatched by the caller ended with an uncaught error.
    #[error("task {id} failed: {source}")]
    TaskFailed { id: TaskId, source: Box<Error> },

    /// A task dispatched by the caller panicked.
    #[error("task {id} panicked: {message}")]
    Panicked { id: TaskId, message: String },

    /// The last runnable task tried to block.
    #[error("deadlock: no runnable task is left to wake the blocked ones")]
    Deadlock,

    /// Application-level failure, or a payload sent with `send_error`.
    #[error("{0}")]
    Raised(String),

    /// The context factory could not produce an execution context.
    #[error("failed to create execution context: {0}")]
    Spawn(String),
}

impl Error {
    pub fn raised(msg: impl Into<String>) -> Self {
        Error::Raised(msg.into())
    }

    pub(crate) fn invalid(task: TaskId, reason: &'static str) -> Self {
        Error::InvalidState { task, reason }
    }

    /// True for the cancellation signal delivered by `Task::kill`.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::TaskTerminated)
    }

    /// Root cause, looking through `TaskFailed` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
