//! Process-wide tracing setup shared by the engine and its tools.

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

pub mod tracing;

pub use tracing::{LogFormat, init_for_tests, init_with};
