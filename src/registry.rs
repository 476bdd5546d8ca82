//! Process-wide table of named backend connections.
//!
//! The registry resolves a connection name to a live [`ClientHandle`],
//! creating it on first use and memoizing it afterwards. Configuration and
//! the client table sit behind one lock; steady-state cache traffic never
//! takes it, only `connect`/`reconnect`/`disconnect` do.
//!
//! # Forking
//!
//! Transports must not be shared across a fork. A process that forks must
//! call [`ConnectionRegistry::reconnect`] (or [`ConnectionRegistry::after_fork`])
//! in the child before using any handle, and may do so in the parent.

use crate::backend::ClientHandle;
use crate::config::{detect_environment, normalize_key, ConfigSource, Configuration};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct RegistryState {
    configuration: Option<Arc<Configuration>>,
    clients: HashMap<String, Arc<ClientHandle>>,
}

/// Named connection registry.
///
/// Keep one instance per process at the composition root and hand it (or the
/// handles it returns) to the stores that need it.
///
/// # Example
///
/// ```
/// use redis_cache_store::config::StaticSource;
/// use redis_cache_store::ConnectionRegistry;
/// use serde_json::json;
///
/// let registry = ConnectionRegistry::new(
///     StaticSource::new(json!({
///         "production": {"cache": {"host": "localhost", "port": 6379, "db": 2}}
///     })),
///     "production",
/// );
///
/// let cache = registry.connect("cache").unwrap();
/// assert!(std::sync::Arc::ptr_eq(&cache, &registry.connect("cache").unwrap()));
/// ```
pub struct ConnectionRegistry {
    source: Box<dyn ConfigSource>,
    environment: String,
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Registry reading `environment`'s section of `source`. Nothing is
    /// loaded until first use.
    pub fn new<S: ConfigSource + 'static>(source: S, environment: impl Into<String>) -> Self {
        ConnectionRegistry {
            source: Box::new(source),
            environment: normalize_key(&environment.into()),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Registry for the environment named by `REDIS_STORE_ENV` / `APP_ENV`.
    pub fn from_env<S: ConfigSource + 'static>(source: S) -> Self {
        Self::new(source, detect_environment())
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Resolved configuration for the active environment.
    ///
    /// Loaded once; the first successful load wins. A failed load is not
    /// remembered, so the next call tries again.
    pub fn configuration(&self) -> Result<Arc<Configuration>> {
        let mut state = self.state.lock();
        self.configuration_locked(&mut state)
    }

    /// Client for `name`, created on first use.
    ///
    /// Parameters with failover coordinators produce a failover client,
    /// anything else a direct one. Later calls return the same handle until
    /// the name is disconnected.
    ///
    /// # Errors
    /// `Error::ConfigError` if `name` is not configured or its parameters
    /// cannot be turned into a client.
    pub fn connect(&self, name: &str) -> Result<Arc<ClientHandle>> {
        let name = normalize_key(name);
        let mut state = self.state.lock();
        let configuration = self.configuration_locked(&mut state)?;

        let params = configuration.get(&name).ok_or_else(|| {
            Error::ConfigError(format!(
                "No redis configuration for {} environment for {}",
                self.environment, name
            ))
        })?;

        if let Some(client) = state.clients.get(&name) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(ClientHandle::from_params(params)?);
        info!("✓ Connected {} redis client for {}", client.kind(), name);
        state.clients.insert(name, Arc::clone(&client));
        Ok(client)
    }

    /// Remove `name` (or every client) from the table and shut it down.
    ///
    /// Shutdown is best-effort: failures are logged and the entry is gone
    /// either way. Stores still holding the handle keep working; the handle
    /// re-opens its transport on next use.
    pub async fn disconnect(&self, name: Option<&str>) {
        debug!("ConnectionRegistry.disconnect start");

        let removed: Vec<(String, Arc<ClientHandle>)> = {
            let mut state = self.state.lock();
            match name {
                Some(name) => state
                    .clients
                    .remove_entry(&normalize_key(name))
                    .into_iter()
                    .collect(),
                None => state.clients.drain().collect(),
            }
        };

        for (name, client) in removed {
            debug!("Disconnecting {} client {}: {:?}", client.kind(), name, client);
            if let Err(e) = client.shutdown().await {
                warn!("Exception while disconnecting {}: {}", name, e);
            }
        }

        debug!("ConnectionRegistry.disconnect complete");
    }

    /// Re-establish the transport of `name` (or every client) in place.
    ///
    /// Handles stay in the table, so stores holding them pick up the new
    /// transport transparently.
    pub fn reconnect(&self, name: Option<&str>) {
        debug!("ConnectionRegistry.reconnect start");

        let wanted = name.map(normalize_key);
        let state = self.state.lock();
        for (name, client) in state.clients.iter() {
            if wanted.as_ref().is_some_and(|wanted| wanted != name) {
                continue;
            }
            debug!("Reconnecting {} client {}: {:?}", client.kind(), name, client);
            client.reconnect();
        }

        debug!("ConnectionRegistry.reconnect complete");
    }

    /// Hook for process managers: call in the child right after a fork.
    pub fn after_fork(&self) {
        info!("Resetting redis connections after fork");
        self.reconnect(None);
    }

    /// Disconnect every client.
    pub async fn shutdown(&self) {
        self.disconnect(None).await;
    }

    /// Names with a live entry in the client table.
    pub fn connected_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().clients.keys().cloned().collect();
        names.sort();
        names
    }

    fn configuration_locked(&self, state: &mut RegistryState) -> Result<Arc<Configuration>> {
        if let Some(configuration) = &state.configuration {
            return Ok(Arc::clone(configuration));
        }

        let raw = self.source.load()?;
        let configuration = Arc::new(Configuration::from_environment(raw, &self.environment)?);
        info!(
            "Loaded redis configuration for {} environment from {} ({} connections)",
            self.environment,
            self.source.describe(),
            configuration.len()
        );
        state.configuration = Some(Arc::clone(&configuration));
        Ok(configuration)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("source", &self.source.describe())
            .field("environment", &self.environment)
            .field("clients", &self.connected_names())
            .finish()
    }
}
