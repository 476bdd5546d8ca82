use super::{DirectClient, Endpoint, FailoverClient, StoreClient};
use crate::config::ConnectionParams;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Live connection owned by the registry: direct or failover-capable.
pub enum ClientHandle {
    Direct(DirectClient),
    Failover(FailoverClient),
}

impl ClientHandle {
    /// Choose the implementation from the parameters: coordinator addresses
    /// select a failover client, anything else a direct one.
    pub fn from_params(params: &ConnectionParams) -> Result<Self> {
        if params.is_failover() {
            Ok(ClientHandle::Failover(FailoverClient::open(params)?))
        } else {
            Ok(ClientHandle::Direct(DirectClient::open(params)?))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientHandle::Direct(_) => "direct",
            ClientHandle::Failover(_) => "failover",
        }
    }

    pub fn is_failover(&self) -> bool {
        matches!(self, ClientHandle::Failover(_))
    }

    /// Re-establish the underlying transport in place.
    pub fn reconnect(&self) {
        match self {
            ClientHandle::Direct(client) => client.reconnect(),
            ClientHandle::Failover(client) => client.reconnect(),
        }
    }

    /// Graceful shutdown of the live transport.
    pub async fn shutdown(&self) -> Result<()> {
        match self {
            ClientHandle::Direct(client) => client.shutdown().await,
            ClientHandle::Failover(client) => client.shutdown().await,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            ClientHandle::Direct(client) => client.generation(),
            ClientHandle::Failover(client) => client.generation(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            ClientHandle::Direct(client) => client.is_connected(),
            ClientHandle::Failover(client) => client.is_connected(),
        }
    }

    fn inner(&self) -> &dyn StoreClient {
        match self {
            ClientHandle::Direct(client) => client,
            ClientHandle::Failover(client) => client,
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self {
            ClientHandle::Direct(client) => client.endpoint().describe(),
            ClientHandle::Failover(client) => client.endpoint().describe(),
        };
        f.debug_struct("ClientHandle")
            .field("kind", &self.kind())
            .field("target", &target)
            .field("generation", &self.generation())
            .finish()
    }
}

#[async_trait]
impl StoreClient for ClientHandle {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner().get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.inner().set(key, value).await
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: Vec<u8>) -> Result<()> {
        self.inner().setex(key, ttl_secs, value).await
    }

    async fn del(&self, key: &str) -> Result<i64> {
        self.inner().del(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.inner().mget(keys).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner().incrby(key, delta).await
    }

    async fn decrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.inner().decrby(key, delta).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.inner().keys(pattern).await
    }

    async fn flushdb(&self) -> Result<()> {
        self.inner().flushdb().await
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        self.inner().info().await
    }

    fn backend_name(&self) -> &'static str {
        self.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_kind_follows_params() {
        let direct = ClientHandle::from_params(&ConnectionParams::default()).expect("direct");
        assert!(matches!(direct, ClientHandle::Direct(_)));

        let params = ConnectionParams {
            failover_servers: vec!["127.0.0.1:26379".into()],
            ..Default::default()
        };
        let failover = ClientHandle::from_params(&params).expect("failover");
        assert!(failover.is_failover());
        assert_eq!(failover.kind(), "failover");
    }
}
