//! Minimal key/value surface that chunked storage is built on.
//!
//! `ChunkStore` and (in `repocache-manifest`) `RepoCache` are generic over
//! this trait rather than depending on a concrete Redis client, so they can
//! be exercised against an in-memory fake in tests. The root crate's
//! `CacheClient` (pooled, retrying, TLS-aware) implements it for production.

use async_trait::async_trait;

/// A single read in a pipeline batch: hit with bytes, or a clean miss.
pub type PipelineGetResult = Option<Vec<u8>>;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Round-trip liveness check.
    async fn ping(&self) -> anyhow::Result<()>;

    /// Fetch a single key.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Set a single key unconditionally. Returns true on success.
    async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<bool>;

    /// Delete zero or more keys, returning the number actually removed.
    async fn delete(&self, keys: &[String]) -> anyhow::Result<u64>;

    /// Count how many of `keys` are present.
    async fn exists(&self, keys: &[String]) -> anyhow::Result<u64>;

    /// Pipelined reads: one round trip, results in input order. A backend
    /// error aborts the whole pipeline; partial results are not returned.
    async fn pipeline_get(&self, keys: &[String]) -> anyhow::Result<Vec<PipelineGetResult>>;

    /// Pipelined writes: one round trip, all-or-nothing. Returns true iff
    /// every write in the batch succeeded.
    async fn pipeline_set(&self, pairs: Vec<(String, Vec<u8>)>) -> anyhow::Result<bool>;

    /// List keys matching a glob-style pattern (e.g. `repo:*:metadata`).
    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>>;
}
