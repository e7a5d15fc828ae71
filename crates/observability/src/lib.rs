//! Tracing/logging setup shared by every forgecast binary.

/// Initialize process-wide observability with JSON logs.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Same as [`init`] with an explicit output format.
pub fn init_with_format(format: LogFormat) {
    tracing::init_with_format(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{LogFormat, ParseLogFormatError};
