// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Help text for CLI commands.

use crate::output;

pub fn print_usage() {
    println!(
        "{} {} - cooperative tasks over rendezvous channels",
        output::title("Strand"),
        output::version(env!("CARGO_PKG_VERSION"))
    );
    println!();
    println!(
        "{}: {} {} {} {}",
        output::section_header("Usage"),
        output::command("strand"),
        output::arg("[-v]"),
        output::arg("<command>"),
        output::arg("[args]")
    );
    println!();
    println!("{}", output::section_header("Demos:"));
    println!("  {} {}           Two tasks bouncing a counter", output::command("pingpong"), output::arg("[rounds]"));
    println!("  {} {}  Values forwarded through a chain of tasks", output::command("pipeline"), output::arg("[stages] [items]"));
    println!("  {} {}               Concurrent prime sieve", output::command("sieve"), output::arg("[count]"));
    println!();
    println!("{}", output::section_header("Other:"));
    println!("  {}                       Show this help", output::command("help"));
    println!("  {}                    Show version", output::command("version"));
    println!();
    println!("{}", output::section_header("Options:"));
    println!("  {}             Log task lifecycle at debug level", output::arg("-v, --verbose"));
    println!();
    println!("{}", output::section_header("Environment:"));
    println!("  {}             Log filter (e.g. strand_rt=trace)", output::arg("STRAND_LOG"));
    println!("  {}      Stack size of task threads in bytes", output::arg("STRAND_STACK_SIZE"));
    println!("  {}   Name prefix of task threads", output::arg("STRAND_THREAD_PREFIX"));
}
