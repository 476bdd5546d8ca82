//! The unit stored per cache key.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A cached value with an optional absolute expiry.
///
/// `expires_at` is stored as milliseconds since the Unix epoch so the entry is
/// meaningful to every process sharing the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<V> {
    pub value: V,
    pub expires_at: Option<u64>,
}

impl<V> Entry<V> {
    /// Entry that never expires on its own.
    pub fn new(value: V) -> Self {
        Entry {
            value,
            expires_at: None,
        }
    }

    /// Entry that expires `expires_in` from now.
    pub fn with_expiry(value: V, expires_in: Option<Duration>) -> Self {
        Entry {
            value,
            expires_at: expires_in.map(|ttl| now_millis().saturating_add(duration_millis(ttl))),
        }
    }

    /// Whether the entry is expired at the given instant (ms since epoch).
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(at) if now_ms >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_expiry_never_expires() {
        let entry = Entry::new("bar");
        assert!(!entry.is_expired_at(u64::MAX));
    }

    #[test]
    fn test_entry_expiry_is_pure_in_time() {
        let entry = Entry {
            value: 1,
            expires_at: Some(1_000),
        };
        assert!(!entry.is_expired_at(999));
        assert!(entry.is_expired_at(1_000));
        assert!(entry.is_expired_at(5_000));
    }

    #[test]
    fn test_unbounded_expiry_saturates() {
        let entry = Entry::with_expiry("v", Some(Duration::MAX));
        assert_eq!(entry.expires_at, Some(u64::MAX));
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_with_expiry_sets_future_deadline() {
        let entry = Entry::with_expiry("v", Some(Duration::from_secs(60)));
        assert!(!entry.is_expired());
        assert!(entry.expires_at.expect("deadline") > now_millis());
    }
}
