//! Shared transport management for backend-protocol clients.
//!
//! A [`RedisClient`] caches one multiplexed transport and issues every command
//! over it. How the transport is opened is delegated to an [`Endpoint`]: a
//! fixed address for direct clients, or a primary resolved through failover
//! coordinators.

use super::{parse_info, StoreClient};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, RedisError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Knows how to open a fresh transport to the backend.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn open(&self) -> Result<MultiplexedConnection>;

    /// Human-readable target for log messages.
    fn describe(&self) -> String;
}

/// Backend client over a lazily established, replaceable transport.
pub struct RedisClient<E: Endpoint> {
    endpoint: E,
    timeout: Option<Duration>,
    transport: Mutex<Option<MultiplexedConnection>>,
    generation: AtomicU64,
}

impl<E: Endpoint> RedisClient<E> {
    pub(crate) fn with_endpoint(endpoint: E, timeout: Option<Duration>) -> Self {
        RedisClient {
            endpoint,
            timeout,
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Number of times the transport was reset by [`RedisClient::reconnect`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether a transport is currently cached.
    pub fn is_connected(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Drop the cached transport in place; the next command opens a new one.
    ///
    /// Required in a forked child, where the inherited socket is shared with
    /// the parent.
    pub fn reconnect(&self) {
        let previous = {
            let mut transport = self.transport.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            transport.take()
        };
        debug!(
            "Transport to {} reset (generation {}, was connected: {})",
            self.endpoint.describe(),
            self.generation(),
            previous.is_some()
        );
    }

    /// Best-effort protocol `QUIT` on the live transport, which is dropped
    /// either way.
    pub async fn shutdown(&self) -> Result<()> {
        let transport = self.transport.lock().take();
        match transport {
            Some(mut conn) => {
                let quit: redis::RedisResult<()> =
                    self.bounded("QUIT", redis::cmd("QUIT").query_async(&mut conn)).await?;
                debug!("Transport to {} closed", self.endpoint.describe());
                quit.map_err(|e| self.backend_error("QUIT", e))
            }
            None => Ok(()),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.transport.lock().clone() {
            return Ok(conn);
        }

        let generation = self.generation();
        let conn = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.endpoint.open())
                .await
                .map_err(|_| {
                    Error::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        self.endpoint.describe(),
                        limit
                    ))
                })??,
            None => self.endpoint.open().await?,
        };

        let mut transport = self.transport.lock();
        // A reconnect raced with this open; the fresh transport is still
        // valid, but only cache it for the generation it was opened under.
        if self.generation() == generation {
            *transport = Some(conn.clone());
        }
        debug!("✓ Connected to {}", self.endpoint.describe());
        Ok(conn)
    }

    /// Apply the configured timeout, keeping the protocol error intact.
    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<redis::RedisResult<T>>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(format!("{} took longer than {:?}", op, limit))),
            None => Ok(fut.await),
        }
    }

    fn backend_error(&self, op: &str, e: RedisError) -> Error {
        Error::BackendError(format!(
            "{} failed on {}: {}",
            op,
            self.endpoint.describe(),
            e
        ))
    }

    /// Forget the cached transport so the next command opens a new one.
    fn discard_transport(&self, op: &str, reason: &str) {
        if self.transport.lock().take().is_some() {
            warn!(
                "⚠ Dropping transport to {} after {} {}",
                self.endpoint.describe(),
                op,
                reason
            );
        }
    }

    async fn query<T: FromRedisValue>(&self, op: &str, cmd: &Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        let reply = match self.bounded(op, cmd.query_async(&mut conn)).await {
            Ok(reply) => reply,
            Err(timeout) => {
                // The reply may still arrive on this transport; don't reuse it.
                self.discard_transport(op, "timed out");
                return Err(timeout);
            }
        };
        reply.map_err(|e| {
            if is_transport_failure(&e) {
                self.discard_transport(op, "lost the connection");
            }
            self.backend_error(op, e)
        })
    }
}

/// Errors after which the transport itself is unusable, as opposed to an
/// error reply to one command.
fn is_transport_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

#[async_trait]
impl<E: Endpoint> StoreClient for RedisClient<E> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.query("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.query("SET", redis::cmd("SET").arg(key).arg(value))
            .await
    }

    async fn setex(&self, key: &str, ttl_secs: u64, value: Vec<u8>) -> Result<()> {
        self.query(
            "SETEX",
            redis::cmd("SETEX").arg(key).arg(ttl_secs).arg(value),
        )
        .await
    }

    async fn del(&self, key: &str) -> Result<i64> {
        self.query("DEL", redis::cmd("DEL").arg(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query("MGET", redis::cmd("MGET").arg(keys)).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.query("INCRBY", redis::cmd("INCRBY").arg(key).arg(delta))
            .await
    }

    async fn decrby(&self, key: &str, delta: i64) -> Result<i64> {
        self.query("DECRBY", redis::cmd("DECRBY").arg(key).arg(delta))
            .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.query("KEYS", redis::cmd("KEYS").arg(pattern)).await
    }

    async fn flushdb(&self) -> Result<()> {
        self.query("FLUSHDB", &redis::cmd("FLUSHDB")).await
    }

    async fn info(&self) -> Result<HashMap<String, String>> {
        let raw: String = self.query("INFO", &redis::cmd("INFO")).await?;
        Ok(parse_info(&raw))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
