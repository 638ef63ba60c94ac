// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Demo programs.

pub mod pingpong;
pub mod pipeline;
pub mod sieve;

use strand_rt::{Result, Scheduler, SchedulerConfig};
use tracing::info;

use crate::output;

fn scheduler() -> Scheduler {
    Scheduler::with_config(SchedulerConfig::from_env())
}

/// Kill leftover tasks and print the closing banner.
fn finish(demo: &str, sched: &Scheduler) -> Result<()> {
    let leftover = sched.live_tasks().len();
    if leftover > 0 {
        info!(tasks = leftover, "stopping leftover tasks");
    }
    sched.shutdown()?;
    println!("{}", output::banner_ok(demo));
    println!("{}", output::stats_line(&sched.stats()));
    Ok(())
}
