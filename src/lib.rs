//! # redis-cache-store
//!
//! A Redis-backed cache store with failure containment, plus a registry of
//! named, reconnectable connections.
//!
//! ## Features
//!
//! - **Failure containment:** reads, writes, deletes and counters degrade to
//!   safe sentinels (`None`/`false`) during a backend outage
//! - **Namespaces:** every key is written as `namespace:name`
//! - **Native counters:** `increment`/`decrement` map onto atomic `INCRBY`/`DECRBY`
//! - **Versioned entries:** values travel in an envelope carrying their expiry
//! - **Local cache:** [`with_local_cache`] remembers entries for the rest of a
//!   task-scoped unit of work
//! - **Connection registry:** named connections from per-environment config,
//!   direct or failover-capable, with in-place reconnect after fork
//!
//! ## Quick Start
//!
//! ```no_run
//! use redis_cache_store::config::TomlFileSource;
//! use redis_cache_store::{ConnectionRegistry, RedisCacheStore, StoreOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> redis_cache_store::Result<()> {
//! let registry = ConnectionRegistry::from_env(TomlFileSource::new("config/redis.toml"));
//!
//! let store = RedisCacheStore::builder()
//!     .with_registry(&registry, "cache")
//!     .with_options(StoreOptions::new().namespace("app"))
//!     .build()?;
//!
//! let ttl = StoreOptions::new().expires_in(Duration::from_secs(60));
//! store.write("greeting", &"hello".to_string(), Some(&ttl)).await;
//! let greeting: Option<String> = store.read("greeting", None).await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod builder;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod local_cache;
pub mod observability;
pub mod registry;
pub mod serialization;
pub mod store;

// Re-exports for convenience
pub use backend::{ClientHandle, StoreClient};
pub use builder::StoreBuilder;
pub use config::{ConfigSource, ConnectionParams};
pub use error::{Error, Result};
pub use key::CacheKey;
pub use local_cache::with_local_cache;
pub use observability::CacheMetrics;
pub use registry::ConnectionRegistry;
pub use store::{RedisCacheStore, StoreOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
