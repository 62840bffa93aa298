//! Fixed-size chunked blob storage for repocache.
//!
//! Large blobs (over 1 MiB) are split into fixed-size chunks before being
//! written to a key/value backend, each chunk carrying its own checksum
//! plus a descriptor covering the whole blob. This bounds any single
//! command sent to the backend regardless of how large the underlying
//! repository content is.

pub mod backend;
pub mod chunker;
pub mod error;
pub mod store;

pub use backend::{CacheBackend, PipelineGetResult};
pub use chunker::{chunk, reconstruct as reconstruct_bytes, should_chunk, verify_chunk, Chunk, ChunkDescriptor, DataType, CHUNK_SIZE};
pub use error::{ChunkError, Result};
pub use store::{chunk_count_key, cleanup, reconstruct, store, CLEANUP_MAX_KEYS};

/// High-level handle bundling a backend reference with the chunk
/// operations, so callers don't have to thread `&dyn CacheBackend`
/// through every call site themselves.
pub struct ChunkStore<'a> {
    backend: &'a dyn CacheBackend,
}

impl<'a> ChunkStore<'a> {
    pub fn new(backend: &'a dyn CacheBackend) -> Self {
        Self { backend }
    }

    /// Store `data` under `(repo, data_type)`, chunking it first if it
    /// exceeds [`CHUNK_SIZE`]. Returns the descriptor written.
    pub async fn put(&self, repo: &str, data_type: DataType, data: &[u8]) -> Result<ChunkDescriptor> {
        let (chunks, descriptor) = chunker::chunk(data, data_type);
        store::store(self.backend, repo, &chunks, &descriptor).await?;
        Ok(descriptor)
    }

    /// Load and verify `(repo, data_type)`, returning `None` on a clean
    /// miss or any detected corruption.
    pub async fn get(&self, repo: &str, data_type: DataType) -> Result<Option<Vec<u8>>> {
        store::reconstruct(self.backend, repo, data_type).await
    }

    /// Remove every key belonging to `(repo, data_type)`.
    pub async fn cleanup(&self, repo: &str, data_type: DataType) -> Result<()> {
        store::cleanup(self.backend, repo, data_type).await
    }
}
