//! Helpers for testing the crate.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Sets up the test environment.
///
/// Initializes a logger that only captures logs from this crate, so all
/// console output is collected by the test runner. Calling this more than
/// once is fine, only the first call takes effect.
pub(crate) fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("autocache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}
