//! Direct client to a single backend address.

use super::connection::{Endpoint, RedisClient};
use crate::config::ConnectionParams;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

/// Fixed backend address.
pub struct DirectEndpoint {
    client: redis::Client,
    target: String,
}

#[async_trait]
impl Endpoint for DirectEndpoint {
    async fn open(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::BackendError(format!("Failed to connect to {}: {}", self.target, e)))
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// Client talking to one backend node.
///
/// # Example
///
/// ```no_run
/// # use redis_cache_store::backend::{DirectClient, StoreClient};
/// # use redis_cache_store::config::ConnectionParams;
/// # async fn example() -> redis_cache_store::Result<()> {
/// let client = DirectClient::open(&ConnectionParams::from_url("redis://127.0.0.1:6379/0"))?;
/// client.set("key", b"value".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
pub type DirectClient = RedisClient<DirectEndpoint>;

impl RedisClient<DirectEndpoint> {
    /// Build a client from connection parameters. No I/O happens until the
    /// first command.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if the parameters do not form a valid URL.
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        let url = params.redis_url();
        let client = redis::Client::open(url.as_str()).map_err(|e| {
            Error::ConfigError(format!("invalid redis connection parameters: {}", e))
        })?;

        let target = redact(&url);
        info!("Direct redis client created for {}", target);

        Ok(RedisClient::with_endpoint(
            DirectEndpoint { client, target },
            params.timeout_duration(),
        ))
    }
}

/// Hide credentials embedded in a URL.
pub(crate) fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &url[..scheme_end + 3], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StoreClient;
    use std::time::Duration;

    #[test]
    fn test_redact_credentials() {
        assert_eq!(redact("redis://:pw@host:6379/0"), "redis://***@host:6379/0");
        assert_eq!(redact("redis://host:6379/0"), "redis://host:6379/0");
    }

    #[test]
    fn test_open_is_lazy() {
        let client = DirectClient::open(&ConnectionParams::default()).expect("client");
        assert!(!client.is_connected());
        assert_eq!(client.generation(), 0);
        assert_eq!(client.endpoint().describe(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn test_open_rejects_bad_url() {
        let err = DirectClient::open(&ConnectionParams::from_url("not a url")).err();
        assert!(err.map(|e| e.is_config()).unwrap_or(false));
    }

    #[test]
    fn test_reconnect_bumps_generation() {
        let client = DirectClient::open(&ConnectionParams::default()).expect("client");
        client.reconnect();
        client.reconnect();
        assert_eq!(client.generation(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let params = ConnectionParams {
            port: Some(1),
            timeout: Some(2.0),
            ..Default::default()
        };
        let client = DirectClient::open(&params).expect("client");
        assert_eq!(client.timeout(), Some(Duration::from_secs(2)));

        assert!(client.get("foo").await.is_err());
        assert!(!client.is_connected());
        // Nothing to close.
        assert!(client.shutdown().await.is_ok());
    }
}
