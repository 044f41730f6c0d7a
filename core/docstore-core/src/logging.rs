//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! embedding application's choice. With the `logging` feature disabled these
//! functions do nothing.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Install a subscriber at `info`, overridable with `RUST_LOG`.
///
/// # Example
/// ```rust
/// docstore_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level("info")
}

/// Install a subscriber at `level` (trace, debug, info, warn, error) unless
/// `RUST_LOG` is set.
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Debug-level output captured by the test harness; safe to call from every
/// test.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("docstore_core=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
