use thiserror::Error;

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("content index error: {0}")]
    Index(#[from] repocache_index::IndexError),

    #[error("manifest error: {0}")]
    Manifest(#[from] repocache_manifest::ManifestError),

    #[error("{0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, VfsError>;
