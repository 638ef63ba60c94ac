// SPDX-License-Identifier: (MIT OR Apache-2.0)

use crate::channel::Preference;

/// Scheduler settings. `Default` suits tests and small programs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Stack size for each task's backing thread.
    pub stack_size: usize,
    /// Backing threads are named `{prefix}-{task id}`.
    pub thread_name_prefix: String,
    /// Preference given to channels created by the scheduler.
    pub default_preference: Preference,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: 256 * 1024,
            thread_name_prefix: "strand-task".to_string(),
            default_preference: Preference::Neither,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `STRAND_STACK_SIZE` and `STRAND_THREAD_PREFIX`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(size) = lookup("STRAND_STACK_SIZE").and_then(|v| v.trim().parse().ok()) {
            config.stack_size = size;
        }
        if let Some(prefix) = lookup("STRAND_THREAD_PREFIX").filter(|v| !v.is_empty()) {
            config.thread_name_prefix = prefix;
        }
        config
    }
}
