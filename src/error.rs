//! The root crate's top-level error, composing every sub-crate's error via
//! `#[from]` and mapping each into the ten-kind `ErrorCategory` taxonomy
//! that `ErrorRouter` and `AuditLog` work with. Internally-raised errors
//! never need message pattern-matching for classification; only
//! externally-sourced strings (a raw Redis error, say) go through
//! [`crate::error_router::classify_message`]'s substring heuristics.

use thiserror::Error;

use repocache_audit::ErrorCategory;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("cache backend error: {0}")]
    Cache(#[from] anyhow::Error),

    #[error("resilience error: {0}")]
    Resilience(#[from] repocache_resilience::ResilienceError),

    #[error("chunk store error: {0}")]
    Chunk(#[from] repocache_chunk::ChunkError),

    #[error("manifest/repo-cache error: {0}")]
    Manifest(#[from] repocache_manifest::ManifestError),

    #[error("content index error: {0}")]
    Index(#[from] repocache_index::IndexError),

    #[error("vfs error: {0}")]
    Vfs(#[from] repocache_vfs::VfsError),

    #[error("audit error: {0}")]
    Audit(#[from] repocache_audit::AuditError),

    #[error("repository url is not a well-formed HTTPS GitHub or SSH URL: {0}")]
    InvalidRepoUrl(String),

    #[error("repository is too large to ingest: {size_mb} MiB exceeds the {limit_mb} MiB limit")]
    RepositoryTooLarge { size_mb: u64, limit_mb: u64 },

    #[error("access denied for tier {tier}: {message}")]
    AccessDenied { tier: String, message: String },

    #[error("external repository ingester failed after {attempts} attempts: {last_error}")]
    IngesterExhausted { attempts: u32, last_error: String },
}

impl CoreError {
    /// The category this error routes to, used by `ErrorRouter::classify`
    /// without ever pattern-matching on `Display` output for
    /// internally-raised variants.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CoreError::Config(_) => ErrorCategory::Validation,
            CoreError::Cache(_) => ErrorCategory::RedisOperation,
            CoreError::Resilience(repocache_resilience::ResilienceError::CircuitOpen)
            | CoreError::Resilience(repocache_resilience::ResilienceError::PoolExhausted)
            | CoreError::Resilience(repocache_resilience::ResilienceError::Timeout(_)) => {
                ErrorCategory::RedisConnection
            }
            CoreError::Resilience(_) => ErrorCategory::RedisOperation,
            CoreError::Chunk(_) => ErrorCategory::RedisOperation,
            CoreError::Manifest(_) => ErrorCategory::RedisOperation,
            CoreError::Index(_) => ErrorCategory::Vfs,
            CoreError::Vfs(_) => ErrorCategory::Vfs,
            CoreError::Audit(_) => ErrorCategory::Unknown,
            CoreError::InvalidRepoUrl(_) => ErrorCategory::Validation,
            CoreError::RepositoryTooLarge { .. } => ErrorCategory::Validation,
            CoreError::AccessDenied { .. } => ErrorCategory::Validation,
            CoreError::IngesterExhausted { .. } => ErrorCategory::Timeout,
        }
    }
}
