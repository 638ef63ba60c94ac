// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.

use colored::{ColoredString, Colorize};
use strand_rt::SchedulerStats;

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

// === Help Output ===

pub fn title(name: &str) -> ColoredString {
    name.bold()
}

pub fn version(v: &str) -> ColoredString {
    v.dimmed()
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

pub fn command(name: &str) -> ColoredString {
    name.green()
}

pub fn arg(name: &str) -> ColoredString {
    name.cyan()
}

// === Demo Output ===

pub fn banner_ok(demo: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} OK", demo).green().bold(),
        "===".dimmed()
    )
}

pub fn stats_line(stats: &SchedulerStats) -> String {
    format!(
        "{} tasks, {} switches ({} finished, {} killed, {} failed)",
        stats.spawned.to_string().bold(),
        stats.switches.to_string().bold(),
        stats.finished,
        stats.killed,
        stats.failed
    )
}
