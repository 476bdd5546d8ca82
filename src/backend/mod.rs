//! Client handles satisfying the cache-store capability set.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub mod connection;
pub mod direct;
pub mod failover;
mod handle;
#[cfg(feature = "inmemory")]
pub mod inmemory;

pub use self::connection::{Endpoint, RedisClient};
pub use self::direct::DirectClient;
pub use self::failover::FailoverClient;
pub use self::handle::ClientHandle;
#[cfg(feature = "inmemory")]
pub use self::inmemory::InMemoryClient;

/// Minimal command set the cache store needs from a connection.
///
/// Keys and values are raw bytes; the store owns namespacing and
/// serialization. Implementations report transport and protocol failures as
/// `Err`, never by panicking.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Fetch raw bytes for a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes without expiry.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Store bytes that the backend drops after `ttl_secs` seconds.
    async fn setex(&self, key: &str, ttl_secs: u64, value: Vec<u8>) -> Result<()>;

    /// Delete a key, returning the number of keys removed.
    async fn del(&self, key: &str) -> Result<i64>;

    /// Fetch many keys in one round trip. The result is aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Atomically add `delta` to the integer stored at `key`.
    async fn incrby(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically subtract `delta` from the integer stored at `key`.
    async fn decrby(&self, key: &str, delta: i64) -> Result<i64>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Remove every key of the selected database.
    async fn flushdb(&self) -> Result<()>;

    /// Backend diagnostics.
    async fn info(&self) -> Result<HashMap<String, String>>;

    /// Backend name for debugging/logging.
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl<T: StoreClient + ?Sized> StoreClient for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: Vec<u8>) -> Result<()> {
        (**self).setex(key, ttl_secs, value).await
    }

    async fn del(&self, key: &str) -> Result<i64> {
        (**self).del(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).mget(keys).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).incrby(key, delta).await
    }

    async fn decrby(&self, key: &str, delta: i64) -> Result<i64> {
        (**self).decrby(key, delta).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        (**self).keys(pattern).await
    }

    async fn flushdb(&self) -> Result<()> {
        (**self).flushdb().await
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        (**self).info().await
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

/// Parse an `INFO` reply (`field:value` lines, `#` section headers).
pub fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(field, value)| (field.to_string(), value.to_string()))
        .collect()
}
