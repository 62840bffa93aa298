//! Error types for chunked blob storage

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkError>;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("chunk {index} checksum mismatch: expected {expected}, got {actual}")]
    ChunkChecksumMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("overall checksum mismatch: expected {expected}, got {actual}")]
    OverallChecksumMismatch { expected: String, actual: String },

    #[error("chunk descriptor missing for repo {repo}, type {data_type}")]
    DescriptorMissing { repo: String, data_type: String },

    #[error("chunk {index} missing for repo {repo}, type {data_type}")]
    ChunkMissing {
        repo: String,
        data_type: String,
        index: usize,
    },

    #[error("malformed chunk descriptor: {0}")]
    MalformedDescriptor(String),
}
