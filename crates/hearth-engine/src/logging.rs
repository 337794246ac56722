//! Tracing setup for binaries and tests.
//!
//! The library itself only emits `tracing` events: `trace` for per-entity
//! bookkeeping, `debug` for per-command activity, `info` for save/load and
//! replay milestones, and `warn` for recoverable oddities (past-due commands,
//! replay serial mismatches, entities left at shutdown). Installing a
//! subscriber is up to the host.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .try_init()
        .is_ok()
}

/// Like [`init_tracing`] but writes through the test harness's captured
/// output, with `RUST_LOG` defaulting to `debug`.
pub fn init_test_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .try_init()
        .is_ok()
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}
