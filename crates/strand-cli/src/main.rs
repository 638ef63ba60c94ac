// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Strand CLI - runs demo programs on the strand runtime.

mod commands;
mod help;
mod logging;
mod output;

use std::env;
use std::process;

fn main() {
    output::init();

    let mut args: Vec<String> = env::args().skip(1).collect();
    let verbose = take_flag(&mut args, &["-v", "--verbose"]);
    logging::init(verbose);

    if args.is_empty() {
        help::print_usage();
        return;
    }

    let result = match args[0].as_str() {
        "pingpong" => {
            let rounds = count_arg(&args, 1, "rounds", 5);
            commands::pingpong::run(rounds)
        }
        "pipeline" => {
            let stages = count_arg(&args, 1, "stages", 3);
            let items = count_arg(&args, 2, "items", 5);
            commands::pipeline::run(stages, items)
        }
        "sieve" => {
            let count = count_arg(&args, 1, "count", 10);
            commands::sieve::run(count)
        }
        "help" | "--help" | "-h" => {
            help::print_usage();
            return;
        }
        "version" | "--version" | "-V" => {
            println!("strand {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        other => {
            eprintln!("{}: unknown command: {}", output::error_label(), other);
            help::print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("{}: {}", output::error_label(), err);
        process::exit(1);
    }
}

/// Remove every occurrence of the given flags. Returns whether any was present.
fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    let before = args.len();
    args.retain(|a| !names.contains(&a.as_str()));
    args.len() != before
}

fn count_arg(args: &[String], idx: usize, name: &str, default: usize) -> usize {
    let Some(raw) = args.get(idx) else {
        return default;
    };
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => {
            eprintln!(
                "{}: {} must be a positive integer, got '{}'",
                output::error_label(),
                name,
                raw
            );
            process::exit(1);
        }
    }
}
