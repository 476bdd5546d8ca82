//! Cache store adapter over a backend client.
//!
//! Maps the generic cache contract (read/write/delete/increment/clear/
//! multi-get/pattern-delete) onto the backend command set. Every protected
//! operation contains backend failures: the error is logged and the
//! operation returns its safe sentinel (`None`/`false`), so an outage
//! degrades the cache to always-miss instead of failing the caller.

use crate::backend::StoreClient;
use crate::builder::StoreBuilder;
use crate::entry::Entry;
use crate::error::Result;
use crate::key::{key_matcher, namespaced_key, CacheKey};
use crate::local_cache;
use crate::observability::{CacheMetrics, NoOpMetrics};
use crate::serialization::{
    deserialize_entry, read_expiry, serialize_entry, EntryCodec, PostcardCodec,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-call and default options.
///
/// Per-call options override the defaults given at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOptions {
    /// Prefix for every physical key (`"{namespace}:{name}"`).
    pub namespace: Option<String>,
    /// Relative TTL applied on write.
    pub expires_in: Option<Duration>,
    /// `fetch` skips the read and recomputes.
    pub force: bool,
}

impl StoreOptions {
    pub fn new() -> Self {
        StoreOptions::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Overlay `call` on top of these defaults.
    pub fn merge(&self, call: Option<&StoreOptions>) -> StoreOptions {
        match call {
            None => self.clone(),
            Some(call) => StoreOptions {
                namespace: call.namespace.clone().or_else(|| self.namespace.clone()),
                expires_in: call.expires_in.or(self.expires_in),
                force: call.force,
            },
        }
    }
}

/// Cache store backed by one backend connection.
///
/// # Example
///
/// ```
/// # use redis_cache_store::{RedisCacheStore, StoreOptions, backend::InMemoryClient};
/// # async fn example() {
/// let store = RedisCacheStore::new(InMemoryClient::new())
///     .with_options(StoreOptions::new().namespace("app"));
///
/// assert!(store.write("foo", &"bar".to_string(), None).await);
/// assert_eq!(store.read::<String, _>("foo", None).await, Some("bar".to_string()));
/// # }
/// ```
pub struct RedisCacheStore<S: EntryCodec = PostcardCodec> {
    data: Arc<dyn StoreClient>,
    codec: S,
    options: StoreOptions,
    metrics: Arc<dyn CacheMetrics>,
}

impl RedisCacheStore<PostcardCodec> {
    /// Store over an existing client, using the default codec.
    pub fn new<C: StoreClient + 'static>(client: C) -> Self {
        Self::from_shared(Arc::new(client))
    }

    /// Store over a client shared with other owners (e.g. the registry).
    pub fn from_shared(client: Arc<dyn StoreClient>) -> Self {
        RedisCacheStore {
            data: client,
            codec: PostcardCodec,
            options: StoreOptions::default(),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    /// Builder resolving the connection from one of the supported sources.
    pub fn builder<'a>() -> StoreBuilder<'a> {
        StoreBuilder::new()
    }
}

impl<S: EntryCodec> RedisCacheStore<S> {
    /// Replace the entry codec.
    pub fn with_codec<S2: EntryCodec>(self, codec: S2) -> RedisCacheStore<S2> {
        RedisCacheStore {
            data: self.data,
            codec,
            options: self.options,
            metrics: self.metrics,
        }
    }

    /// Set the default options merged into every call.
    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Set custom metrics handler.
    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn codec(&self) -> &S {
        &self.codec
    }

    /// Underlying client (for advanced use).
    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.data
    }

    /// Read a value. Absent, expired, undecodable and failed reads all
    /// return `None`.
    pub async fn read<V, K>(&self, name: &K, options: Option<&StoreOptions>) -> Option<V>
    where
        V: DeserializeOwned,
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());
        let timer = Instant::now();

        let entry = self
            .contain(
                "reading cache entry from redis",
                &key,
                None,
                self.read_entry::<V>(&key),
            )
            .await;

        match entry {
            Some(entry) if !entry.is_expired() => {
                self.metrics.record_hit(&key, timer.elapsed());
                Some(entry.into_value())
            }
            Some(_) => {
                debug!("Cache entry {} expired, deleting", key);
                local_cache::forget(self.local_owner(), &key);
                self.contain(
                    "deleting cache entry from redis",
                    &key,
                    false,
                    async { self.data.del(&key).await.map(|_| true) },
                )
                .await;
                self.metrics.record_miss(&key, timer.elapsed());
                None
            }
            None => {
                self.metrics.record_miss(&key, timer.elapsed());
                None
            }
        }
    }

    /// Write a value, with a backend TTL when `expires_in` is set.
    ///
    /// Returns `false` if serialization or the backend call fails.
    pub async fn write<V, K>(&self, name: &K, value: &V, options: Option<&StoreOptions>) -> bool
    where
        V: Serialize,
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());
        let timer = Instant::now();

        let entry = Entry::with_expiry(value, options.expires_in);
        let bytes = match serialize_entry(&self.codec, &entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Error serializing cache entry for {}: {}", key, e);
                self.metrics.record_error(&key, &e.to_string());
                return false;
            }
        };

        let local = local_cache::is_active().then(|| bytes.clone());
        let written = self
            .contain("writing cache entry to redis", &key, false, async {
                match options.expires_in.and_then(backend_ttl) {
                    Some(secs) => self.data.setex(&key, secs, bytes).await,
                    None => self.data.set(&key, bytes).await,
                }
                .map(|_| true)
            })
            .await;

        match local {
            Some(bytes) if written => {
                local_cache::remember(self.local_owner(), &key, Some(&bytes));
            }
            _ => local_cache::forget(self.local_owner(), &key),
        }
        if written {
            self.metrics.record_write(&key, timer.elapsed());
        }
        written
    }

    /// Delete a value. `true` when the backend accepted the command, whether
    /// or not the key existed.
    pub async fn delete<K>(&self, name: &K, options: Option<&StoreOptions>) -> bool
    where
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());

        local_cache::forget(self.local_owner(), &key);
        self.contain("deleting cache entry from redis", &key, false, async {
            self.data.del(&key).await.map(|_| true)
        })
        .await
    }

    /// Whether a present, unexpired entry exists.
    pub async fn exist<K>(&self, name: &K, options: Option<&StoreOptions>) -> bool
    where
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());

        self.contain("checking cache entry in redis", &key, None, async {
            let raw = self.get_raw(&key).await?;
            Ok(raw.map(|bytes| self.decodes_live(&bytes)))
        })
        .await
        .unwrap_or(false)
    }

    /// Read-through: return the cached value, or compute, write and return
    /// it. `force` skips the read.
    pub async fn fetch<V, K, F, Fut>(
        &self,
        name: &K,
        options: Option<&StoreOptions>,
        compute: F,
    ) -> V
    where
        V: Serialize + DeserializeOwned,
        K: CacheKey + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let options = self.options.merge(options);

        if !options.force {
            if let Some(value) = self.read(name, Some(&options)).await {
                return value;
            }
        }

        let value = compute().await;
        self.write(name, &value, Some(&options)).await;
        value
    }

    /// Read many values with a single `MGET`.
    ///
    /// The result maps each expanded name to its value and only contains
    /// names that are present and unexpired.
    pub async fn read_multi<V, K>(
        &self,
        names: &[K],
        options: Option<&StoreOptions>,
    ) -> HashMap<String, V>
    where
        V: DeserializeOwned,
        K: CacheKey,
    {
        let options = self.options.merge(options);
        if names.is_empty() {
            return HashMap::new();
        }
        let timer = Instant::now();

        let names: Vec<String> = names.iter().map(CacheKey::cache_key).collect();
        let keys: Vec<String> = names
            .iter()
            .map(|name| namespaced_key(name, options.namespace.as_deref()))
            .collect();

        let raw_values = self
            .contain(
                "reading multiple cache entries from redis",
                &keys.join(","),
                Vec::new(),
                self.data.mget(&keys),
            )
            .await;

        let mut values = HashMap::with_capacity(raw_values.len());
        let mut raw_values = raw_values.into_iter();
        for (name, key) in names.into_iter().zip(&keys) {
            let entry = raw_values.next().flatten().and_then(|bytes| {
                match deserialize_entry::<S, V>(&self.codec, &bytes) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        debug!("Discarding undecodable cache entry {}: {}", key, e);
                        None
                    }
                }
            });
            match entry {
                Some(entry) if !entry.is_expired() => {
                    self.metrics.record_hit(key, timer.elapsed());
                    values.insert(name, entry.into_value());
                }
                _ => self.metrics.record_miss(key, timer.elapsed()),
            }
        }
        values
    }

    /// Delete every namespaced key matching a glob pattern.
    ///
    /// Lists matching keys then deletes them one by one; writers racing with
    /// the scan may survive it. Returns the number of keys deleted, or `None`
    /// when the backend failed.
    pub async fn delete_matched(
        &self,
        pattern: &str,
        options: Option<&StoreOptions>,
    ) -> Option<usize> {
        let options = self.options.merge(options);
        let matcher = key_matcher(pattern, options.namespace.as_deref());

        local_cache::forget_all(self.local_owner());
        self.contain("calling delete_matched on redis", &matcher, None, async {
            let keys = self.data.keys(&matcher).await?;
            for key in &keys {
                self.data.del(key).await?;
            }
            debug!("✓ delete_matched {} removed {} keys", matcher, keys.len());
            Ok(Some(keys.len()))
        })
        .await
    }

    /// Atomic increment. `None` on backend error, including when the stored
    /// value is not a native integer (e.g. it was written with `write`).
    pub async fn increment<K>(
        &self,
        name: &K,
        amount: i64,
        options: Option<&StoreOptions>,
    ) -> Option<i64>
    where
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());

        let counted = self
            .contain("incrementing cache entry in redis", &key, None, async {
                self.data.incrby(&key, amount).await.map(Some)
            })
            .await;
        self.remember_counter(&key, counted);
        counted
    }

    /// Atomic decrement; see [`RedisCacheStore::increment`].
    pub async fn decrement<K>(
        &self,
        name: &K,
        amount: i64,
        options: Option<&StoreOptions>,
    ) -> Option<i64>
    where
        K: CacheKey + ?Sized,
    {
        let options = self.options.merge(options);
        let key = namespaced_key(name, options.namespace.as_deref());

        let counted = self
            .contain("decrementing cache entry in redis", &key, None, async {
                self.data.decrby(&key, amount).await.map(Some)
            })
            .await;
        self.remember_counter(&key, counted);
        counted
    }

    /// Flush the whole selected database, not only this store's namespace.
    pub async fn clear(&self, _options: Option<&StoreOptions>) -> Result<()> {
        warn!(
            "⚠ Flushing entire {} database for cache clear",
            self.data.backend_name()
        );
        local_cache::forget_all(self.local_owner());
        self.data.flushdb().await
    }

    /// Backend diagnostics.
    pub async fn stats(&self) -> Result<HashMap<String, String>> {
        self.data.info().await
    }

    /// `GET`, served from the local cache when one is active.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let owner = self.local_owner();
        if let Some(raw) = local_cache::lookup(owner, key) {
            trace!("Local cache hit for {}", key);
            return Ok(raw);
        }
        let raw = self.data.get(key).await?;
        local_cache::remember(owner, key, raw.as_deref());
        Ok(raw)
    }

    /// Identity of the backend in the local cache; stores sharing a client
    /// share entries.
    fn local_owner(&self) -> usize {
        Arc::as_ptr(&self.data) as *const () as usize
    }

    fn remember_counter(&self, key: &str, counted: Option<i64>) {
        match counted {
            Some(n) => {
                local_cache::remember(self.local_owner(), key, Some(n.to_string().as_bytes()));
            }
            None => local_cache::forget(self.local_owner(), key),
        }
    }

    async fn read_entry<V: DeserializeOwned>(&self, key: &str) -> Result<Option<Entry<V>>> {
        let raw = self.get_raw(key).await?;
        Ok(raw.and_then(|bytes| match deserialize_entry(&self.codec, &bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }))
    }

    /// Liveness check that does not need the value type; bare values never
    /// expire on their own.
    fn decodes_live(&self, bytes: &[u8]) -> bool {
        match read_expiry(bytes) {
            Ok(None) => true,
            Ok(Some(expires_at)) => !Entry {
                value: (),
                expires_at,
            }
            .is_expired(),
            Err(_) => false,
        }
    }

    /// Run a backend call, turning any error into `sentinel`.
    async fn contain<T, F>(&self, action: &str, key: &str, sentinel: T, call: F) -> T
    where
        F: Future<Output = Result<T>>,
    {
        match call.await {
            Ok(value) => value,
            Err(e) => {
                error!("Error {} ({}): {}", action, key, e);
                self.metrics.record_error(key, &e.to_string());
                sentinel
            }
        }
    }
}

impl<S: EntryCodec + Clone> Clone for RedisCacheStore<S> {
    fn clone(&self) -> Self {
        RedisCacheStore {
            data: Arc::clone(&self.data),
            codec: self.codec.clone(),
            options: self.options.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<S: EntryCodec> fmt::Debug for RedisCacheStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("backend", &self.data.backend_name())
            .field("codec", &self.codec.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Longest TTL handed to `SETEX`; the server rejects expiries that overflow
/// its millisecond clock.
const MAX_BACKEND_TTL_SECS: u64 = i32::MAX as u64;

/// Backend TTL in whole seconds, rounded up, at least one.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl
        .as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0));
    secs.max(1)
}

/// `None` when the TTL is beyond what the backend accepts. Such entries are
/// written without a backend TTL and expire through their envelope.
fn backend_ttl(ttl: Duration) -> Option<u64> {
    Some(ttl_secs(ttl)).filter(|secs| *secs <= MAX_BACKEND_TTL_SECS)
}
