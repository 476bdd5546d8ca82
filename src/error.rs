//! Error types shared by the store, the backends and the registry.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by cache-store operations.
///
/// Only configuration errors are meant to reach callers of the store. Backend,
/// serialization and timeout errors are contained by [`crate::RedisCacheStore`]
/// and turned into cache misses.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown connection name, unparsable parameters, or more than one
    /// connection source supplied.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Transport or protocol failure reported by the backend.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A value could not be encoded for storage.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Stored bytes could not be decoded into the requested type.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Envelope header present but malformed.
    #[error("invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    /// Envelope written by an incompatible schema version.
    #[error("cache entry version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    /// The configured client timeout elapsed.
    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// True for errors that indicate programmer or deployment mistakes.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::ConfigError(_))
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::BackendError(e.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::DeserializationError(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigError(format!("invalid TOML configuration: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_classification() {
        assert!(Error::ConfigError("x".into()).is_config());
        assert!(!Error::BackendError("x".into()).is_config());
    }

    #[test]
    fn test_version_mismatch_message() {
        let e = Error::VersionMismatch {
            expected: 1,
            found: 7,
        };
        assert_eq!(
            e.to_string(),
            "cache entry version mismatch: expected 1, found 7"
        );
    }
}
