//! `CacheClient`: a pooled, retrying, TLS-aware key/value client over
//! Redis (or any Redis-protocol-compatible endpoint). Implements
//! [`repocache_chunk::CacheBackend`] so `ChunkStore`/`RepoCache` can be
//! exercised against it without depending on the `redis` crate directly.
//!
//! The `redis` crate's own connection manager does not expose the
//! bounded-pool-with-health-check and jittered-backoff semantics this
//! system requires, so those are layered on top explicitly via
//! `repocache-resilience`'s `ConnectionPool` and `CircuitBreaker`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{instrument, warn};

use repocache_chunk::{CacheBackend, PipelineGetResult};
use repocache_resilience::{
    CircuitBreaker, CircuitBreakerConfig, ConnectionFactory, ConnectionPool, PoolConfig,
    ResilienceError,
};

use crate::config::CacheConfig;
use crate::error::CoreError;

fn classify(err: &redis::RedisError) -> ResilienceError {
    use redis::ErrorKind::*;
    match err.kind() {
        AuthenticationFailed | InvalidClientConfig => ResilienceError::Permanent(err.to_string()),
        _ if err.is_timeout() => ResilienceError::Timeout(Duration::from_secs(0)),
        _ => ResilienceError::Transient(err.to_string()),
    }
}

struct RedisConnectionFactory {
    client: redis::Client,
}

#[async_trait]
impl ConnectionFactory<MultiplexedConnection> for RedisConnectionFactory {
    async fn create(&self) -> Result<MultiplexedConnection, ResilienceError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| classify(&e))
    }

    async fn is_healthy(&self, conn: &MultiplexedConnection) -> bool {
        let mut conn = conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Builds a `redis://`/`rediss://` URL with embedded auth, since
/// `redis::Client::open` takes connection info from the URL alone.
fn connection_url(config: &CacheConfig) -> String {
    let Some(password) = &config.password else {
        return config.url.clone();
    };
    if config.url.contains('@') {
        return config.url.clone();
    }
    let Some((scheme, rest)) = config.url.split_once("://") else {
        return config.url.clone();
    };
    format!("{scheme}://:{password}@{rest}")
}

pub struct CacheClient {
    pool: ConnectionPool<MultiplexedConnection>,
    breaker: CircuitBreaker,
    max_retries: usize,
}

impl CacheClient {
    /// Build the client and its connection pool, but do not eagerly
    /// connect: the first operation acquires the first real connection.
    pub fn connect(config: &CacheConfig) -> crate::error::Result<Self> {
        let client = redis::Client::open(connection_url(config))
            .map_err(|e| CoreError::Cache(anyhow::anyhow!(e)))?;

        let pool_config = PoolConfig {
            max_size: config.max_connections.max(1),
            acquire_timeout: config.socket_timeout,
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::new(Arc::new(RedisConnectionFactory { client }), pool_config);

        let breaker_config = CircuitBreakerConfig {
            max_retries: 3,
            ..CircuitBreakerConfig::default()
        };

        Ok(Self {
            pool,
            breaker: CircuitBreaker::new(breaker_config),
            max_retries: 3,
        })
    }

    /// Run `op` against a pooled connection, through the circuit breaker's
    /// retry-with-backoff loop. The connection is always returned to the
    /// pool, success or failure.
    async fn with_retry<T, F, Fut>(&self, op: F) -> anyhow::Result<T>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, ResilienceError>>,
    {
        self.breaker
            .execute(|| async {
                let conn = self.pool.acquire().await?;
                let handle = conn.clone();
                let result = op(conn).await;
                self.pool.release(handle).await;
                result
            })
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }
}

#[async_trait]
impl CacheBackend for CacheClient {
    #[instrument(skip(self))]
    async fn ping(&self) -> anyhow::Result<()> {
        self.with_retry(|mut conn| async move {
            redis::cmd("PING")
                .query_async::<_, String>(&mut conn)
                .await
                .map(|_| ())
                .map_err(|e| classify(&e))
        })
        .await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            async move { conn.get(&key).await.map_err(|e| classify(&e)) }
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<bool> {
        let key = key.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            async move {
                conn.set::<_, _, ()>(&key, value)
                    .await
                    .map(|_| true)
                    .map_err(|e| classify(&e))
            }
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.with_retry(move |mut conn| {
            let keys = keys.clone();
            async move { conn.del(&keys).await.map_err(|e| classify(&e)) }
        })
        .await
    }

    async fn exists(&self, keys: &[String]) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.with_retry(move |mut conn| {
            let keys = keys.clone();
            async move { conn.exists(&keys).await.map_err(|e| classify(&e)) }
        })
        .await
    }

    /// Single round trip: a Redis pipeline of `GET`s, results in input
    /// order. A backend error aborts the whole pipeline.
    async fn pipeline_get(&self, keys: &[String]) -> anyhow::Result<Vec<PipelineGetResult>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        self.with_retry(move |mut conn| {
            let keys = keys.clone();
            async move {
                let mut pipe = redis::pipe();
                for key in &keys {
                    pipe.get(key);
                }
                pipe.query_async(&mut conn).await.map_err(|e| classify(&e))
            }
        })
        .await
    }

    /// Single round trip: a Redis pipeline of `SET`s. All-or-nothing —
    /// `query_async` fails the whole call on any command error.
    async fn pipeline_set(&self, pairs: Vec<(String, Vec<u8>)>) -> anyhow::Result<bool> {
        if pairs.is_empty() {
            return Ok(true);
        }
        self.with_retry(move |mut conn| {
            let pairs = pairs.clone();
            async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                for (key, value) in &pairs {
                    pipe.set(key, value);
                }
                pipe.query_async::<_, ()>(&mut conn)
                    .await
                    .map(|_| true)
                    .map_err(|e| classify(&e))
            }
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let pattern = pattern.to_string();
        self.with_retry(move |mut conn| {
            let pattern = pattern.clone();
            async move { conn.keys(&pattern).await.map_err(|e| classify(&e)) }
        })
        .await
    }
}

impl CacheClient {
    /// Snapshot of pool utilization for the health report.
    pub async fn pool_stats(&self) -> repocache_resilience::PoolStats {
        self.pool.stats().await
    }

    pub async fn circuit_state(&self) -> repocache_resilience::CircuitState {
        self.breaker.get_state().await
    }
}

pub(crate) fn warn_on_loopback_reject(url: &str) {
    warn!(url, "rejecting configuration: loopback cache endpoint");
}
