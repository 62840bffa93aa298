//! Pipelined store/reconstruct/cleanup of chunked blobs against a
//! [`CacheBackend`].
//!
//! Keys follow `{repo}:{data_type}:chunk_count`, `{repo}:{data_type}:chunk_metadata`,
//! `{repo}:{data_type}:chunk:{i}` and `{repo}:{data_type}:chunk:{i}:checksum`.

use tracing::warn;

use crate::backend::CacheBackend;
use crate::chunker::{self, Chunk, ChunkDescriptor, DataType};
use crate::error::{ChunkError, Result};

/// Upper bound on keys deleted by a single `cleanup` call, in batches of
/// [`CLEANUP_BATCH_SIZE`]. A repo whose chunk count exceeds this is cleaned
/// up over several calls rather than risking an unbounded delete.
pub const CLEANUP_MAX_KEYS: usize = 2000;
const CLEANUP_BATCH_SIZE: usize = 50;

fn count_key(repo: &str, data_type: DataType) -> String {
    format!("{repo}:{data_type}:chunk_count")
}

fn metadata_key(repo: &str, data_type: DataType) -> String {
    format!("{repo}:{data_type}:chunk_metadata")
}

/// The `chunk_count` key for `(repo, data_type)`, exposed so callers can
/// check whether a chunked entry exists without paying for a full
/// reconstruct-and-verify.
pub fn chunk_count_key(repo: &str, data_type: DataType) -> String {
    count_key(repo, data_type)
}

fn chunk_key(repo: &str, data_type: DataType, index: usize) -> String {
    format!("{repo}:{data_type}:chunk:{index}")
}

fn checksum_key(repo: &str, data_type: DataType, index: usize) -> String {
    format!("{repo}:{data_type}:chunk:{index}:checksum")
}

/// Store pre-split chunks and their descriptor atomically: a single
/// pipelined write covering the count, the metadata, and every chunk plus
/// its checksum. Succeeds only if every write in the batch does.
pub async fn store(
    backend: &dyn CacheBackend,
    repo: &str,
    chunks: &[Chunk],
    descriptor: &ChunkDescriptor,
) -> Result<()> {
    let data_type = descriptor.data_type;
    let metadata_json = serde_json::to_vec(descriptor)
        .map_err(|e| ChunkError::MalformedDescriptor(e.to_string()))?;

    let mut pairs = Vec::with_capacity(2 + chunks.len() * 2);
    pairs.push((
        count_key(repo, data_type),
        descriptor.chunk_count.to_string().into_bytes(),
    ));
    pairs.push((metadata_key(repo, data_type), metadata_json));
    for c in chunks {
        pairs.push((chunk_key(repo, data_type, c.index), c.bytes.clone()));
        pairs.push((
            checksum_key(repo, data_type, c.index),
            c.checksum.clone().into_bytes(),
        ));
    }

    let ok = backend.pipeline_set(pairs).await?;
    if !ok {
        return Err(ChunkError::Backend(anyhow::anyhow!(
            "pipeline_set reported partial failure for repo {repo}, type {data_type}"
        )));
    }
    Ok(())
}

/// Load the descriptor and every chunk for `(repo, data_type)`, verify each
/// chunk's checksum and the overall SHA-256, and return the reassembled
/// bytes. Any corruption — missing descriptor, missing chunk, or a
/// checksum mismatch anywhere — returns `Ok(None)` rather than a hard
/// error, matching the "corrupt entry behaves like a cache miss" rule.
pub async fn reconstruct(
    backend: &dyn CacheBackend,
    repo: &str,
    data_type: DataType,
) -> Result<Option<Vec<u8>>> {
    let Some(metadata_bytes) = backend.get(&metadata_key(repo, data_type)).await? else {
        return Ok(None);
    };
    let descriptor: ChunkDescriptor = match serde_json::from_slice(&metadata_bytes) {
        Ok(d) => d,
        Err(_) => {
            warn!(repo, %data_type, "chunk descriptor failed to parse, treating as corrupt");
            return Ok(None);
        }
    };

    let mut keys = Vec::with_capacity(descriptor.chunk_count * 2);
    for i in 0..descriptor.chunk_count {
        keys.push(chunk_key(repo, data_type, i));
        keys.push(checksum_key(repo, data_type, i));
    }
    let results = backend.pipeline_get(&keys).await?;

    let mut ordered = Vec::with_capacity(descriptor.chunk_count);
    for i in 0..descriptor.chunk_count {
        let Some(bytes) = results[i * 2].clone() else {
            warn!(repo, %data_type, index = i, "chunk missing, treating entry as corrupt");
            return Ok(None);
        };
        let Some(checksum_bytes) = results[i * 2 + 1].clone() else {
            warn!(repo, %data_type, index = i, "chunk checksum missing, treating entry as corrupt");
            return Ok(None);
        };
        let checksum = String::from_utf8_lossy(&checksum_bytes).to_string();
        if chunker::verify_chunk(i, &bytes, &checksum).is_err() {
            warn!(repo, %data_type, index = i, "chunk checksum mismatch, treating entry as corrupt");
            return Ok(None);
        }
        ordered.push(bytes);
    }

    match chunker::reconstruct(ordered, &descriptor) {
        Ok(data) => Ok(Some(data)),
        Err(_) => {
            warn!(repo, %data_type, "overall checksum mismatch, treating entry as corrupt");
            Ok(None)
        }
    }
}

/// Delete every key belonging to a chunked entry, in batches of
/// [`CLEANUP_BATCH_SIZE`], up to [`CLEANUP_MAX_KEYS`] keys total. If the
/// chunk count is large enough that this bound would be hit, a warning is
/// logged and the caller should re-invoke cleanup to finish the job.
pub async fn cleanup(backend: &dyn CacheBackend, repo: &str, data_type: DataType) -> Result<()> {
    let chunk_count: usize = match backend.get(&count_key(repo, data_type)).await? {
        Some(bytes) => String::from_utf8_lossy(&bytes)
            .parse()
            .unwrap_or_default(),
        None => 0,
    };

    let mut all_keys = vec![count_key(repo, data_type), metadata_key(repo, data_type)];
    for i in 0..chunk_count {
        all_keys.push(chunk_key(repo, data_type, i));
        all_keys.push(checksum_key(repo, data_type, i));
    }

    if all_keys.len() > CLEANUP_MAX_KEYS {
        warn!(
            repo,
            %data_type,
            total_keys = all_keys.len(),
            limit = CLEANUP_MAX_KEYS,
            "cleanup truncated at key limit, call cleanup again to finish"
        );
        all_keys.truncate(CLEANUP_MAX_KEYS);
    }

    for batch in all_keys.chunks(CLEANUP_BATCH_SIZE) {
        backend.delete(batch).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk, CHUNK_SIZE};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl CacheBackend for FakeBackend {
        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> anyhow::Result<bool> {
            self.data.lock().unwrap().insert(key.to_string(), value);
            Ok(true)
        }

        async fn delete(&self, keys: &[String]) -> anyhow::Result<u64> {
            let mut data = self.data.lock().unwrap();
            let mut removed = 0;
            for k in keys {
                if data.remove(k).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn exists(&self, keys: &[String]) -> anyhow::Result<u64> {
            let data = self.data.lock().unwrap();
            Ok(keys.iter().filter(|k| data.contains_key(*k)).count() as u64)
        }

        async fn pipeline_get(&self, keys: &[String]) -> anyhow::Result<Vec<super::super::backend::PipelineGetResult>> {
            let data = self.data.lock().unwrap();
            Ok(keys.iter().map(|k| data.get(k).cloned()).collect())
        }

        async fn pipeline_set(&self, pairs: Vec<(String, Vec<u8>)>) -> anyhow::Result<bool> {
            let mut data = self.data.lock().unwrap();
            for (k, v) in pairs {
                data.insert(k, v);
            }
            Ok(true)
        }

        async fn keys(&self, _pattern: &str) -> anyhow::Result<Vec<String>> {
            Ok(self.data.lock().unwrap().keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn store_then_reconstruct_round_trips() {
        let backend = FakeBackend::default();
        let data = vec![3u8; CHUNK_SIZE * 2 + 17];
        let (chunks, descriptor) = chunk(&data, DataType::Content);

        store(&backend, "acme/widgets", &chunks, &descriptor)
            .await
            .unwrap();

        let rebuilt = reconstruct(&backend, "acme/widgets", DataType::Content)
            .await
            .unwrap();
        assert_eq!(rebuilt, Some(data));
    }

    #[tokio::test]
    async fn reconstruct_missing_entry_is_none() {
        let backend = FakeBackend::default();
        let rebuilt = reconstruct(&backend, "nope/repo", DataType::Content)
            .await
            .unwrap();
        assert_eq!(rebuilt, None);
    }

    #[tokio::test]
    async fn reconstruct_corrupt_chunk_is_none() {
        let backend = FakeBackend::default();
        let data = vec![5u8; CHUNK_SIZE + 5];
        let (chunks, descriptor) = chunk(&data, DataType::Content);
        store(&backend, "acme/widgets", &chunks, &descriptor)
            .await
            .unwrap();

        backend
            .set(&chunk_key("acme/widgets", DataType::Content, 0), vec![0u8; 4])
            .await
            .unwrap();

        let rebuilt = reconstruct(&backend, "acme/widgets", DataType::Content)
            .await
            .unwrap();
        assert_eq!(rebuilt, None);
    }

    #[tokio::test]
    async fn cleanup_removes_all_keys() {
        let backend = FakeBackend::default();
        let data = vec![1u8; CHUNK_SIZE + 1];
        let (chunks, descriptor) = chunk(&data, DataType::Content);
        store(&backend, "acme/widgets", &chunks, &descriptor)
            .await
            .unwrap();

        cleanup(&backend, "acme/widgets", DataType::Content)
            .await
            .unwrap();

        assert_eq!(
            reconstruct(&backend, "acme/widgets", DataType::Content)
                .await
                .unwrap(),
            None
        );
        assert!(backend.data.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_is_idempotent() {
        let backend = FakeBackend::default();
        let data = vec![2u8; CHUNK_SIZE + 1];
        let (chunks, descriptor) = chunk(&data, DataType::Content);

        store(&backend, "acme/widgets", &chunks, &descriptor)
            .await
            .unwrap();
        store(&backend, "acme/widgets", &chunks, &descriptor)
            .await
            .unwrap();

        let rebuilt = reconstruct(&backend, "acme/widgets", DataType::Content)
            .await
            .unwrap();
        assert_eq!(rebuilt, Some(data));
    }
}
