// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Log setup: `LEVEL message` lines on stderr, no timestamps or targets.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Install the global subscriber. `STRAND_LOG` overrides the level picked
/// from `verbose`.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("STRAND_LOG")
        .from_env_lossy();

    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(filter);

    // A second init (tests) keeps the first subscriber.
    let _ = Registry::default().with(layer).try_init();
}
