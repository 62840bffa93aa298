//! RepoCache: the four-key-per-repo cache built on top of `ChunkStore`.
//!
//! Key layout (all strings):
//! ```text
//! repo:{owner/name}:content   (may be chunked)
//! repo:{owner/name}:tree      (may be chunked)
//! repo:{owner/name}:summary   (may be chunked)
//! repo:{owner/name}:metadata  "stored_at:…,repo_name:…,data_types:…,chunked_types:…"
//! ```
//! When a blob is chunked its top-level key is absent and
//! `metadata.chunked_types` lists its type.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::warn;

use repocache_chunk::{chunk_count_key, should_chunk, CacheBackend, ChunkStore, DataType};

use crate::error::{ManifestError, Result};
use crate::types::RepoMetadata;

/// A conservative upper bound on chunk indices to delete when `chunk_count`
/// cannot be determined (e.g. during `Invalidate` against a partially
/// corrupt entry).
const CONSERVATIVE_CHUNK_UPPER_BOUND: usize = 100;

fn top_level_key(repo: &str, data_type: DataType) -> String {
    format!("repo:{repo}:{data_type}")
}

fn metadata_key(repo: &str) -> String {
    format!("repo:{repo}:metadata")
}

/// The four data blobs a repository caches, all as raw bytes — decoding
/// into UTF-8 text is the caller's concern.
#[derive(Debug, Clone)]
pub struct RepoBlobs {
    pub content: Vec<u8>,
    pub tree: Vec<u8>,
    pub summary: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsStatus {
    /// All three blobs and the metadata record are present.
    pub exists: bool,
    /// Some but not all of the four pieces are present — the caller
    /// should treat this like a miss and trigger cleanup-and-refetch.
    pub partial: bool,
    pub metadata: Option<RepoMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoListEntry {
    pub name: String,
    pub stored_at: chrono::DateTime<Utc>,
    pub data_types: BTreeSet<DataType>,
}

const ALL_TYPES: [DataType; 3] = [DataType::Content, DataType::Tree, DataType::Summary];

pub struct RepoCache<'a> {
    backend: &'a dyn CacheBackend,
    chunks: ChunkStore<'a>,
}

impl<'a> RepoCache<'a> {
    pub fn new(backend: &'a dyn CacheBackend) -> Self {
        Self {
            backend,
            chunks: ChunkStore::new(backend),
        }
    }

    fn blob_for(blobs: &RepoBlobs, data_type: DataType) -> &[u8] {
        match data_type {
            DataType::Content => &blobs.content,
            DataType::Tree => &blobs.tree,
            DataType::Summary => &blobs.summary,
        }
    }

    /// Store `blobs` for `repo`, deciding per-blob chunking, clearing any
    /// stale chunk remnants from a previous store first. Idempotent: a
    /// repeat call with identical data leaves the store in the same
    /// state.
    pub async fn store(&self, repo: &str, blobs: &RepoBlobs) -> Result<()> {
        for data_type in ALL_TYPES {
            if let Err(e) = self.chunks.cleanup(repo, data_type).await {
                warn!(repo, %data_type, error = %e, "failed to clean up stale chunk remnants before store");
            }
        }

        let mut chunked_types = BTreeSet::new();
        let mut pipeline_pairs = Vec::new();

        for data_type in ALL_TYPES {
            let bytes = Self::blob_for(blobs, data_type);
            if should_chunk(bytes) {
                self.chunks.put(repo, data_type, bytes).await?;
                chunked_types.insert(data_type);
            } else {
                pipeline_pairs.push((top_level_key(repo, data_type), bytes.to_vec()));
            }
        }

        let metadata = RepoMetadata {
            stored_at: Utc::now(),
            repo_name: repo.to_string(),
            data_types: BTreeSet::from(ALL_TYPES),
            chunked_types,
        };
        // Written last in this pipeline so any reader observing it is
        // guaranteed to see every other key already applied.
        pipeline_pairs.push((metadata_key(repo), metadata.to_wire().into_bytes()));

        let ok = self.backend.pipeline_set(pipeline_pairs).await?;
        if !ok {
            return Err(ManifestError::Backend(anyhow::anyhow!(
                "pipeline_set reported partial failure storing repo {repo}"
            )));
        }
        Ok(())
    }

    async fn blob_present(&self, repo: &str, data_type: DataType, chunked: bool) -> Result<bool> {
        if chunked {
            Ok(self
                .backend
                .exists(&[chunk_count_key(repo, data_type)])
                .await?
                > 0)
        } else {
            Ok(self.backend.exists(&[top_level_key(repo, data_type)]).await? > 0)
        }
    }

    pub async fn exists_with_metadata(&self, repo: &str) -> Result<ExistsStatus> {
        let Some(metadata_bytes) = self.backend.get(&metadata_key(repo)).await? else {
            return Ok(ExistsStatus {
                exists: false,
                partial: false,
                metadata: None,
            });
        };
        let metadata = RepoMetadata::from_wire(&String::from_utf8_lossy(&metadata_bytes))?;

        let mut present = 0usize;
        for data_type in ALL_TYPES {
            let chunked = metadata.chunked_types.contains(&data_type);
            if self.blob_present(repo, data_type, chunked).await? {
                present += 1;
            }
        }

        let exists = present == ALL_TYPES.len();
        let partial = present > 0 && !exists;

        Ok(ExistsStatus {
            exists,
            partial,
            metadata: Some(metadata),
        })
    }

    /// Parse metadata, reassemble chunked blobs via `ChunkStore`, and
    /// pipeline-read the rest. Returns `None` if any required piece is
    /// missing or fails integrity.
    pub async fn get(&self, repo: &str) -> Result<Option<RepoBlobs>> {
        let Some(metadata_bytes) = self.backend.get(&metadata_key(repo)).await? else {
            return Ok(None);
        };
        let metadata = match RepoMetadata::from_wire(&String::from_utf8_lossy(&metadata_bytes)) {
            Ok(m) => m,
            Err(e) => {
                warn!(repo, error = %e, "metadata record failed to parse, treating as corrupt");
                return Ok(None);
            }
        };

        let mut non_chunked_keys = Vec::new();
        for data_type in ALL_TYPES {
            if !metadata.chunked_types.contains(&data_type) {
                non_chunked_keys.push(top_level_key(repo, data_type));
            }
        }
        let non_chunked_results = self.backend.pipeline_get(&non_chunked_keys).await?;
        let mut non_chunked_iter = non_chunked_results.into_iter();

        let mut values: [Option<Vec<u8>>; 3] = [None, None, None];
        for (i, data_type) in ALL_TYPES.into_iter().enumerate() {
            if metadata.chunked_types.contains(&data_type) {
                match self.chunks.get(repo, data_type).await? {
                    Some(bytes) => values[i] = Some(bytes),
                    None => return Ok(None),
                }
            } else {
                match non_chunked_iter.next().flatten() {
                    Some(bytes) => values[i] = Some(bytes),
                    None => return Ok(None),
                }
            }
        }

        let [content, tree, summary] = values;
        match (content, tree, summary) {
            (Some(content), Some(tree), Some(summary)) => Ok(Some(RepoBlobs {
                content,
                tree,
                summary,
            })),
            _ => Ok(None),
        }
    }

    /// Delete top-level keys AND all possible chunk keys up to
    /// `chunk_count` (or a conservative bound if the count is missing).
    /// Metadata is deleted FIRST so a crash mid-cleanup cannot leave a
    /// "live" entry pointing at missing chunks.
    pub async fn invalidate(&self, repo: &str) -> Result<()> {
        self.backend.delete(&[metadata_key(repo)]).await?;

        for data_type in ALL_TYPES {
            self.backend
                .delete(&[top_level_key(repo, data_type)])
                .await?;

            let has_chunks = self
                .backend
                .exists(&[chunk_count_key(repo, data_type)])
                .await?
                > 0;
            if has_chunks {
                self.chunks.cleanup(repo, data_type).await?;
            } else {
                // Be conservative: clean up any straggler chunk keys even
                // without a reliable count, up to a fixed bound.
                let keys: Vec<String> = (0..CONSERVATIVE_CHUNK_UPPER_BOUND)
                    .map(|i| format!("repo:{repo}:{data_type}:chunk:{i}"))
                    .collect();
                self.backend.delete(&keys).await?;
            }
        }
        Ok(())
    }

    /// Scan `repo:*:metadata` and parse each entry.
    pub async fn list(&self) -> Result<Vec<RepoListEntry>> {
        let keys = self.backend.keys("repo:*:metadata").await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.backend.get(&key).await? else {
                continue;
            };
            match RepoMetadata::from_wire(&String::from_utf8_lossy(&bytes)) {
                Ok(metadata) => entries.push(RepoListEntry {
                    name: metadata.repo_name,
                    stored_at: metadata.stored_at,
                    data_types: metadata.data_types,
                }),
                Err(e) => warn!(key, error = %e, "skipping unparseable metadata record in list"),
            }
        }
        Ok(entries)
    }
}
