//! Failover-capable client.
//!
//! The current primary is looked up through the configured coordinators each
//! time a transport is opened, so a reconnect after a failover lands on the
//! promoted node.

use super::connection::{Endpoint, RedisClient};
use super::direct::redact;
use crate::config::ConnectionParams;
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{SentinelClient, SentinelServerType};
use tokio::sync::Mutex;

/// Primary resolved through failover coordinators.
pub struct SentinelEndpoint {
    sentinel: Mutex<SentinelClient>,
    master_name: String,
    coordinators: Vec<String>,
    db: i64,
    username: Option<String>,
    password: Option<String>,
}

impl SentinelEndpoint {
    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    pub fn coordinators(&self) -> &[String] {
        &self.coordinators
    }
}

#[async_trait]
impl Endpoint for SentinelEndpoint {
    async fn open(&self) -> Result<MultiplexedConnection> {
        let mut conn = {
            let mut sentinel = self.sentinel.lock().await;
            sentinel.get_async_connection().await.map_err(|e| {
                Error::BackendError(format!(
                    "Failed to resolve primary '{}' via {:?}: {}",
                    self.master_name, self.coordinators, e
                ))
            })?
        };

        if let Some(password) = &self.password {
            let mut auth = redis::cmd("AUTH");
            if let Some(username) = &self.username {
                auth.arg(username);
            }
            let _: () = auth.arg(password).query_async(&mut conn).await?;
        }
        if self.db != 0 {
            let _: () = redis::cmd("SELECT")
                .arg(self.db)
                .query_async(&mut conn)
                .await?;
        }
        Ok(conn)
    }

    fn describe(&self) -> String {
        format!("primary '{}' (db {})", self.master_name, self.db)
    }
}

/// Client that follows the primary elected by the failover coordinators.
pub type FailoverClient = RedisClient<SentinelEndpoint>;

impl RedisClient<SentinelEndpoint> {
    /// Build a failover client from parameters carrying coordinator
    /// addresses. No I/O happens until the first command.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when no coordinators are configured or an
    /// address is invalid.
    pub fn open(params: &ConnectionParams) -> Result<Self> {
        let coordinators = params.failover_urls();
        if coordinators.is_empty() {
            return Err(Error::ConfigError(
                "failover client requires at least one coordinator address".to_string(),
            ));
        }

        let sentinel = SentinelClient::build(
            coordinators.clone(),
            params.master_name().to_string(),
            None,
            SentinelServerType::Master,
        )
        .map_err(|e| Error::ConfigError(format!("invalid failover coordinators: {}", e)))?;

        let coordinators: Vec<String> = coordinators.iter().map(|c| redact(c)).collect();
        info!(
            "Failover redis client created for '{}' via {:?}",
            params.master_name(),
            coordinators
        );

        Ok(RedisClient::with_endpoint(
            SentinelEndpoint {
                sentinel: Mutex::new(sentinel),
                master_name: params.master_name().to_string(),
                coordinators,
                db: params.db_index(),
                username: params.username.clone(),
                password: params.password.clone(),
            },
            params.timeout_duration(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_requires_coordinators() {
        let err = FailoverClient::open(&ConnectionParams::default()).err();
        assert!(err.map(|e| e.is_config()).unwrap_or(false));
    }

    #[test]
    fn test_open_is_lazy() {
        let params = ConnectionParams {
            failover_servers: vec!["127.0.0.1:26379".into(), "127.0.0.1:26380".into()],
            master_name: Some("cache".into()),
            db: Some(2),
            ..Default::default()
        };
        let client = FailoverClient::open(&params).expect("client");
        assert!(!client.is_connected());
        assert_eq!(client.endpoint().master_name(), "cache");
        assert_eq!(client.endpoint().coordinators().len(), 2);
        assert_eq!(client.endpoint().describe(), "primary 'cache' (db 2)");
    }
}
