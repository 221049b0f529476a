//! Logging Setup
//!
//! `tracing` subscriber initialization for embedders and tests. Filters come
//! from `FOS_OBJECT_LOG` (same syntax as `RUST_LOG`).

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "FOS_OBJECT_LOG";

const DEFAULT_FILTER: &str = "fos_object=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a global fmt subscriber. A no-op if one is already set.
pub fn init() {
    let _ = tracing_subscriber::fmt().with_env_filter(filter()).try_init();
}

/// Subscriber that writes through the test harness's captured output
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init();
}
