//! Tracing subscriber setup for the `dfcore` binary.
//!
//! Log lines go to stderr so stdout carries only command results.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Filter directive: `RUST_LOG` if set, otherwise `debug` when verbose,
/// otherwise the configured level.
pub fn filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config, verbose))
        .with_writer(std::io::stderr)
        .with_target(false);

    // try_init fails only when a subscriber is already installed
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
