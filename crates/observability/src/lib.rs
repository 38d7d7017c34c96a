//! Process-wide tracing setup shared by every binary.

/// Initialize process-wide logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber construction (filters, formats).
pub mod tracing;

pub use self::tracing::LogFormat;
