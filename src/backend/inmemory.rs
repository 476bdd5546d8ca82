//! In-process client implementing the capability set.
//!
//! Mirrors the backend's semantics closely enough for tests and for
//! embedding without a server: integer counters are stored as decimal text,
//! `KEYS` uses the same glob syntax, and TTLs are honored lazily on access.

use super::StoreClient;
use crate::error::{Error, Result};
use crate::key::glob_match;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Thread-safe in-memory client. Clones share the same keyspace.
///
/// # Example
///
/// ```
/// # use redis_cache_store::backend::{InMemoryClient, StoreClient};
/// # async fn example() -> redis_cache_store::Result<()> {
/// let client = InMemoryClient::new();
/// client.set("key", b"value".to_vec()).await?;
/// assert_eq!(client.get("key").await?, Some(b"value".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryClient {
    store: Arc<DashMap<String, StoredValue>>,
}

impl InMemoryClient {
    pub fn new() -> Self {
        InMemoryClient::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.store.iter().filter(|e| e.value().is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.store.retain(|_, v| v.is_live(now));
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let expired = match self.store.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.data.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.store.remove_if(key, |_, v| !v.is_live(now));
        }
        None
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let now = Instant::now();
        let mut slot = self
            .store
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                data: b"0".to_vec(),
                expires_at: None,
            });

        if !slot.is_live(now) {
            *slot = StoredValue {
                data: b"0".to_vec(),
                expires_at: None,
            };
        }

        let current = std::str::from_utf8(&slot.data)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or_else(|| {
                Error::BackendError("ERR value is not an integer or out of range".to_string())
            })?;
        let next = current.checked_add(delta).ok_or_else(|| {
            Error::BackendError("ERR increment or decrement would overflow".to_string())
        })?;

        slot.data = next.to_string().into_bytes();
        Ok(next)
    }
}

#[async_trait]
impl StoreClient for InMemoryClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self.live(key);
        debug!(
            "InMemory GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: None,
            },
        );
        debug!("InMemory SET {}", key);
        Ok(())
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: Vec<u8>) -> Result<()> {
        if ttl_secs == 0 {
            return Err(Error::BackendError(
                "ERR invalid expire time in 'setex' command".to_string(),
            ));
        }
        self.store.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        debug!("InMemory SETEX {} (TTL: {}s)", key, ttl_secs);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        Ok(match self.store.remove(key) {
            Some((_, value)) if value.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        Ok(keys.iter().map(|key| self.live(key)).collect())
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.add(key, delta)
    }

    async fn decrby(&self, key: &str, delta: i64) -> Result<i64> {
        let delta = delta.checked_neg().ok_or_else(|| {
            Error::BackendError("ERR decrement would overflow".to_string())
        })?;
        self.add(key, delta)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .store
            .iter()
            .filter(|e| e.value().is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn flushdb(&self) -> Result<()> {
        self.store.clear();
        warn!("⚠ InMemory FLUSHDB executed - all keys cleared!");
        Ok(())
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        let mut info = HashMap::new();
        info.insert("backend".to_string(), "inmemory".to_string());
        info.insert("keys".to_string(), self.len().to_string());
        Ok(info)
    }

    fn backend_name(&self) -> &'static str {
        "inmemory"
    }
}
