//! Tracing bootstrap for embedders and tests.

use tracing_subscriber::EnvFilter;

/// Initialize a global `tracing` subscriber.
///
/// Verbosity maps 0 → info, 1 → debug, 2+ → trace; a `RUST_LOG`
/// environment filter takes precedence when set. Safe to call more than
/// once: later calls are no-ops.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
