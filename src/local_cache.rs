//! Per-task local cache in front of the backend.
//!
//! Inside [`with_local_cache`], raw entries that a store reads or writes are
//! remembered until the scope ends. Repeated reads of one key then cost a
//! single backend round trip. Misses are remembered too.
//!
//! The scope is bound to the current task: tasks spawned from inside it do
//! not see it, and stores used outside any scope always go to the backend.

use dashmap::DashMap;
use std::future::Future;

tokio::task_local! {
    static LOCAL_CACHE: LocalCache;
}

/// Raw entries keyed by (backend identity, physical key).
#[derive(Default)]
struct LocalCache {
    entries: DashMap<(usize, String), Option<Vec<u8>>>,
}

/// Run `fut` with a fresh local cache, or inside the one already active.
///
/// ```
/// # use redis_cache_store::{RedisCacheStore, backend::InMemoryClient, local_cache::with_local_cache};
/// # async fn example() {
/// let store = RedisCacheStore::new(InMemoryClient::new());
/// with_local_cache(async {
///     store.read::<String, _>("user:1", None).await;
///     // Served from the local cache.
///     store.read::<String, _>("user:1", None).await;
/// })
/// .await;
/// # }
/// ```
pub async fn with_local_cache<F: Future>(fut: F) -> F::Output {
    if is_active() {
        return fut.await;
    }
    debug!("✓ Local cache scope opened");
    LOCAL_CACHE.scope(LocalCache::default(), fut).await
}

/// Whether the current task runs inside [`with_local_cache`].
pub fn is_active() -> bool {
    LOCAL_CACHE.try_with(|_| ()).is_ok()
}

/// `Some(raw)` when the key was seen in this scope, `raw` being `None` for a
/// remembered miss.
pub(crate) fn lookup(owner: usize, key: &str) -> Option<Option<Vec<u8>>> {
    LOCAL_CACHE
        .try_with(|cache| {
            cache
                .entries
                .get(&(owner, key.to_string()))
                .map(|raw| raw.value().clone())
        })
        .ok()
        .flatten()
}

pub(crate) fn remember(owner: usize, key: &str, raw: Option<&[u8]>) {
    let _ = LOCAL_CACHE.try_with(|cache| {
        cache
            .entries
            .insert((owner, key.to_string()), raw.map(<[u8]>::to_vec));
    });
}

pub(crate) fn forget(owner: usize, key: &str) {
    let _ = LOCAL_CACHE.try_with(|cache| {
        cache.entries.remove(&(owner, key.to_string()));
    });
}

/// Drop everything remembered for one backend.
pub(crate) fn forget_all(owner: usize) {
    let _ = LOCAL_CACHE.try_with(|cache| {
        cache.entries.retain(|(entry_owner, _), _| *entry_owner != owner);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outside_scope_is_inert() {
        assert!(!is_active());
        remember(1, "foo", Some(b"bar"));
        assert_eq!(lookup(1, "foo"), None);
    }

    #[tokio::test]
    async fn test_scope_remembers_hits_and_misses() {
        with_local_cache(async {
            assert!(is_active());
            remember(1, "foo", Some(b"bar"));
            remember(1, "gone", None);

            assert_eq!(lookup(1, "foo"), Some(Some(b"bar".to_vec())));
            assert_eq!(lookup(1, "gone"), Some(None));
            assert_eq!(lookup(2, "foo"), None);

            forget(1, "foo");
            assert_eq!(lookup(1, "foo"), None);
        })
        .await;
        assert!(!is_active());
    }

    #[tokio::test]
    async fn test_nested_scope_shares_entries() {
        with_local_cache(async {
            remember(1, "foo", Some(b"bar"));
            with_local_cache(async {
                assert_eq!(lookup(1, "foo"), Some(Some(b"bar".to_vec())));
                remember(2, "baz", None);
            })
            .await;

            forget_all(1);
            assert_eq!(lookup(1, "foo"), None);
            assert_eq!(lookup(2, "baz"), Some(None));
        })
        .await;
    }
}
