//! Tracing/logging setup shared by every binary.

/// Initialize process-wide observability for `service`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(service: &str) {
    tracing::init(service);
}

/// Tracing configuration (filters, output format).
pub mod tracing;
