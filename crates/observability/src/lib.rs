//! Process-wide tracing setup shared by the binaries.

pub mod tracing;

pub use tracing::LogFormat;

/// Initialize tracing with the format named by `LOG_FORMAT` (JSON by default).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init(format);
}
