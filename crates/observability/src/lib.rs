//! Process-wide tracing setup shared by every binary.

/// Initialize tracing with the format named by `LOG_FORMAT`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Subscriber construction (filter, format, timer).
pub mod tracing;
