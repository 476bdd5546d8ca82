//! Instrumentation hooks for cache operations.

use std::time::Duration;

/// Receives per-operation measurements from [`crate::RedisCacheStore`].
///
/// Every method has a no-op default so implementors override only what they
/// record.
pub trait CacheMetrics: Send + Sync {
    /// A read found a present, unexpired entry.
    fn record_hit(&self, _key: &str, _duration: Duration) {}

    /// A read found nothing usable (absent, expired or undecodable).
    fn record_miss(&self, _key: &str, _duration: Duration) {}

    /// A write was accepted by the backend.
    fn record_write(&self, _key: &str, _duration: Duration) {}

    /// A backend error was contained and turned into a safe sentinel.
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Default metrics sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}
