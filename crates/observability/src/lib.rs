//! Tracing and logging setup shared by every binary and test that embeds the
//! ledger.

pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide tracing.
///
/// Reads `RUST_LOG` (default `info`) and `TALLY_LOG_FORMAT`. Safe to call
/// multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init(LogFormat::from_env());
}
