//! Builder resolving a store's connection from one of several sources.

use crate::backend::{ClientHandle, DirectClient, StoreClient};
use crate::config::{normalize_keys, ConnectionParams};
use crate::error::{Error, Result};
use crate::observability::CacheMetrics;
use crate::registry::ConnectionRegistry;
use crate::serialization::{EntryCodec, PostcardCodec};
use crate::store::{RedisCacheStore, StoreOptions};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

enum ConnectionSource<'a> {
    Client(Arc<dyn StoreClient>),
    Named(&'a ConnectionRegistry, String),
    Url(String),
    Params(Value),
}

impl ConnectionSource<'_> {
    fn describe(&self) -> String {
        match self {
            ConnectionSource::Client(client) => format!("client ({})", client.backend_name()),
            ConnectionSource::Named(_, name) => format!("named connection {}", name),
            ConnectionSource::Url(_) => "url".to_string(),
            ConnectionSource::Params(_) => "parameters".to_string(),
        }
    }
}

/// Fluent builder for [`RedisCacheStore`].
///
/// At most one connection source may be given: an existing client, a name
/// resolved through a [`ConnectionRegistry`], a URL, or a parameter
/// mapping. With none, a direct client to the default local address is
/// used.
///
/// # Example
///
/// ```
/// use redis_cache_store::RedisCacheStore;
/// use serde_json::json;
///
/// let store = RedisCacheStore::builder()
///     .with_params(json!({"host": "localhost", "db": 3, "namespace": "app", "expires_in": 60}))
///     .build()
///     .unwrap();
///
/// assert_eq!(store.options().namespace.as_deref(), Some("app"));
/// ```
pub struct StoreBuilder<'a, S: EntryCodec = PostcardCodec> {
    sources: Vec<ConnectionSource<'a>>,
    options: StoreOptions,
    metrics: Option<Arc<dyn CacheMetrics>>,
    codec: S,
}

impl<'a> StoreBuilder<'a, PostcardCodec> {
    pub fn new() -> Self {
        StoreBuilder {
            sources: Vec::new(),
            options: StoreOptions::default(),
            metrics: None,
            codec: PostcardCodec,
        }
    }
}

impl Default for StoreBuilder<'_, PostcardCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, S: EntryCodec> StoreBuilder<'a, S> {
    /// Use an existing client.
    pub fn with_client<C: StoreClient + 'static>(self, client: C) -> Self {
        self.with_shared_client(Arc::new(client))
    }

    /// Use a client shared with other owners.
    pub fn with_shared_client(mut self, client: Arc<dyn StoreClient>) -> Self {
        self.sources.push(ConnectionSource::Client(client));
        self
    }

    /// Use the registry's client for `name`.
    pub fn with_registry(mut self, registry: &'a ConnectionRegistry, name: impl Into<String>) -> Self {
        self.sources.push(ConnectionSource::Named(registry, name.into()));
        self
    }

    /// Connect directly to `url`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.sources.push(ConnectionSource::Url(url.into()));
        self
    }

    /// Connect directly using a parameter mapping.
    ///
    /// `namespace` and `expires_in` (seconds) found in the mapping become
    /// default store options unless set explicitly.
    pub fn with_params(mut self, params: Value) -> Self {
        self.sources.push(ConnectionSource::Params(params));
        self
    }

    /// Default options merged into every call.
    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_codec<S2: EntryCodec>(self, codec: S2) -> StoreBuilder<'a, S2> {
        StoreBuilder {
            sources: self.sources,
            options: self.options,
            metrics: self.metrics,
            codec,
        }
    }

    /// Resolve the connection and build the store.
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` when more than one source was given, the named
    /// connection is not configured, or the URL/parameters are invalid.
    pub fn build(mut self) -> Result<RedisCacheStore<S>> {
        if self.sources.len() > 1 {
            let given: Vec<String> = self.sources.iter().map(ConnectionSource::describe).collect();
            return Err(Error::ConfigError(format!(
                "Only a single connection must be provided (got {})",
                given.join(", ")
            )));
        }

        let client: Arc<dyn StoreClient> = match self.sources.pop() {
            Some(ConnectionSource::Client(client)) => client,
            Some(ConnectionSource::Named(registry, name)) => registry.connect(&name)?,
            Some(ConnectionSource::Url(url)) => direct(&ConnectionParams::from_url(url))?,
            Some(ConnectionSource::Params(value)) => {
                let value = normalize_keys(value)?;
                lift_store_options(&value, &mut self.options);
                direct(&ConnectionParams::from_value(value)?)?
            }
            None => direct(&ConnectionParams::default())?,
        };

        debug!("✓ Cache store built over {} backend", client.backend_name());

        let store = RedisCacheStore::from_shared(client)
            .with_codec(self.codec)
            .with_options(self.options);
        Ok(match self.metrics {
            Some(metrics) => store.with_metrics(metrics),
            None => store,
        })
    }
}

fn direct(params: &ConnectionParams) -> Result<Arc<dyn StoreClient>> {
    Ok(Arc::new(ClientHandle::Direct(DirectClient::open(params)?)))
}

/// Copy store options carried in a connection mapping into `options`,
/// keeping anything already set.
fn lift_store_options(value: &Value, options: &mut StoreOptions) {
    let Value::Object(map) = value else { return };

    if options.namespace.is_none() {
        options.namespace = map
            .get("namespace")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    if options.expires_in.is_none() {
        options.expires_in = map
            .get("expires_in")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64);
    }
}
