//! Error types for the data model, tier policy, and repo cache.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("chunk store error: {0}")]
    Chunk(#[from] repocache_chunk::ChunkError),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("malformed metadata record: {0}")]
    MalformedMetadata(String),

    #[error("repository context is corrupt: {0}")]
    CorruptContext(String),

    #[error("unknown tier {0:?}, available tiers: {1:?}")]
    UnknownTier(String, Vec<String>),

    #[error("invalid tier configuration: {0}")]
    InvalidTierConfig(String),

    #[error("estimated_tokens must be non-negative, got {0}")]
    NegativeTokens(i64),
}
