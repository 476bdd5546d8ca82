//! Connection configuration.
//!
//! A configuration source yields `environment -> connection name -> params`.
//! Only the active environment's section is kept, with every mapping key
//! normalized (trimmed, lower-cased, `-` and spaces turned into `_`).

use crate::error::{Error, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default backend port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default host used when neither `url`, `host` nor `path` is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Primary name looked up through the failover coordinators by default.
pub const DEFAULT_MASTER_NAME: &str = "mymaster";

/// Characters left as-is in URL credentials (RFC 3986 unreserved).
const USERINFO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Store options that may ride along in a connection mapping.
pub const UNIVERSAL_OPTIONS: &[&str] = &[
    "namespace",
    "compress",
    "compress_threshold",
    "expires_in",
    "race_condition_ttl",
];

/// Parameters for one named connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Unix socket path.
    pub path: Option<String>,
    pub db: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Connect/command timeout in seconds.
    pub timeout: Option<f64>,
    pub thread_safe: Option<bool>,
    /// Failover coordinator addresses. Accepts a list or a comma-separated
    /// string.
    #[serde(
        alias = "zkservers",
        deserialize_with = "deserialize_server_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub failover_servers: Vec<String>,
    pub master_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerList {
    Many(Vec<String>),
    One(String),
}

fn deserialize_server_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let servers = match Option::<ServerList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(ServerList::Many(list)) => list,
        Some(ServerList::One(joined)) => joined.split(',').map(str::to_string).collect(),
    };
    Ok(servers
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl ConnectionParams {
    /// Parameters from a URL such as `redis://127.0.0.1:6379/0`.
    pub fn from_url(url: impl Into<String>) -> Self {
        ConnectionParams {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Interpret a mapping as connection parameters.
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` when the value is not a mapping or a field has the
    /// wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        match normalize_keys(value)? {
            Value::Object(mut map) => {
                for option in UNIVERSAL_OPTIONS {
                    map.remove(*option);
                }
                serde_json::from_value(Value::Object(map)).map_err(|e| {
                    Error::ConfigError(format!("invalid redis connection parameters: {}", e))
                })
            }
            Value::String(url) => Ok(Self::from_url(url)),
            other => Err(Error::ConfigError(format!(
                "Need a url or hash for a redis connection, got {}",
                other
            ))),
        }
    }

    /// Whether a failover-capable client should be used.
    pub fn is_failover(&self) -> bool {
        !self.failover_servers.is_empty()
    }

    pub fn db_index(&self) -> i64 {
        self.db.unwrap_or(0)
    }

    pub fn master_name(&self) -> &str {
        self.master_name.as_deref().unwrap_or(DEFAULT_MASTER_NAME)
    }

    /// Configured timeout, ignoring non-positive values.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// URL for a direct connection.
    pub fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        if let Some(path) = &self.path {
            let mut url = format!("redis+unix://{}?db={}", path, self.db_index());
            if let Some(user) = &self.username {
                url.push_str(&format!("&user={}", utf8_percent_encode(user, USERINFO)));
            }
            if let Some(pass) = &self.password {
                url.push_str(&format!("&pass={}", utf8_percent_encode(pass, USERINFO)));
            }
            return url;
        }

        format!(
            "redis://{}{}:{}/{}",
            self.credentials(),
            self.host.as_deref().unwrap_or(DEFAULT_HOST),
            self.port.unwrap_or(DEFAULT_PORT),
            self.db_index()
        )
    }

    /// Coordinator addresses as URLs.
    pub fn failover_urls(&self) -> Vec<String> {
        self.failover_servers
            .iter()
            .map(|server| {
                if server.contains("://") {
                    server.clone()
                } else {
                    format!("redis://{}", server)
                }
            })
            .collect()
    }

    /// Percent-encoded `user:pass@` prefix; the URL parser decodes it back.
    fn credentials(&self) -> String {
        let user = self
            .username
            .as_deref()
            .map(|user| utf8_percent_encode(user, USERINFO).to_string());
        let pass = self
            .password
            .as_deref()
            .map(|pass| utf8_percent_encode(pass, USERINFO).to_string());
        match (user, pass) {
            (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
            (None, Some(pass)) => format!(":{}@", pass),
            (Some(user), None) => format!("{}@", user),
            (None, None) => String::new(),
        }
    }
}

/// Resolved connection table for the active environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    environment: String,
    connections: BTreeMap<String, ConnectionParams>,
}

impl Configuration {
    /// Select and parse the `environment` section of a raw configuration.
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` when the root or the section is not a mapping, the
    /// section is missing, or an entry cannot be interpreted as parameters.
    pub fn from_environment(root: Value, environment: &str) -> Result<Self> {
        let environment = normalize_key(environment);
        let mut root = match normalize_keys(root)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::ConfigError(format!(
                    "redis configuration must be a mapping of environments, got {}",
                    other
                )))
            }
        };

        let section = match root.remove(&environment) {
            Some(Value::Object(section)) => section,
            Some(_) => {
                return Err(Error::ConfigError(format!(
                    "redis configuration for {} environment must be a mapping",
                    environment
                )))
            }
            None => {
                return Err(Error::ConfigError(format!(
                    "No redis configuration for {} environment",
                    environment
                )))
            }
        };

        let mut connections = BTreeMap::new();
        for (name, value) in section {
            let params = ConnectionParams::from_value(value).map_err(|e| {
                Error::ConfigError(format!("connection '{}' in {}: {}", name, environment, e))
            })?;
            connections.insert(name, params);
        }

        Ok(Configuration {
            environment,
            connections,
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionParams> {
        self.connections.get(&normalize_key(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Canonical form of a configuration key or connection name.
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Normalize mapping keys recursively, including mappings nested in lists.
///
/// # Errors
///
/// `Error::ConfigError` when two keys of one mapping normalize to the same
/// form (e.g. `Cache` and `cache`, or `a-b` and `a_b`).
pub fn normalize_keys(value: Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut normalized = Map::with_capacity(map.len());
            for (key, value) in map {
                let canonical = normalize_key(&key);
                if normalized.contains_key(&canonical) {
                    return Err(Error::ConfigError(format!(
                        "configuration key '{}' collides with another key normalized to '{}'",
                        key, canonical
                    )));
                }
                normalized.insert(canonical, normalize_keys(value)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(normalize_keys)
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(other),
    }
}

/// Where the raw `environment -> connections` mapping comes from.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Value>;

    /// Short description for log messages.
    fn describe(&self) -> String {
        "configuration source".to_string()
    }
}

/// Already-resolved configuration held in memory.
#[derive(Debug, Clone)]
pub struct StaticSource {
    value: Value,
}

impl StaticSource {
    pub fn new(value: Value) -> Self {
        StaticSource { value }
    }
}

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<Value> {
        Ok(self.value.clone())
    }

    fn describe(&self) -> String {
        "static configuration".to_string()
    }
}

/// A TOML file such as `config/redis.toml`, one table per environment.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TomlFileSource { path: path.into() }
    }
}

impl ConfigSource for TomlFileSource {
    fn load(&self) -> Result<Value> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Active deployment environment from `REDIS_STORE_ENV` or `APP_ENV`,
/// defaulting to `development`.
pub fn detect_environment() -> String {
    env::var("REDIS_STORE_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}
