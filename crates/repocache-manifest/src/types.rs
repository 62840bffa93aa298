//! Core data model: byte-offset file locations, the in-process repository
//! context built from them, and the wire-format metadata record stored
//! alongside each repo's cached blobs.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

pub use repocache_chunk::DataType;

use crate::error::{ManifestError, Result};

/// A contiguous region of a repository's content dump. Immutable once
/// built by the content indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub start_offset: usize,
    pub end_offset: usize,
    pub size: usize,
    /// Hex-encoded MD5 of the extracted bytes.
    pub checksum: String,
}

impl FileLocation {
    pub fn new(start_offset: usize, end_offset: usize, bytes: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        Self {
            start_offset,
            end_offset,
            size: bytes.len(),
            checksum: hex::encode(hasher.finalize()),
        }
    }

    /// Extract and verify this location's bytes out of `content_blob`.
    pub fn extract<'a>(&self, content_blob: &'a [u8]) -> Result<&'a [u8]> {
        let slice = content_blob
            .get(self.start_offset..self.end_offset)
            .ok_or_else(|| {
                ManifestError::CorruptContext(format!(
                    "file location [{}, {}) out of bounds for blob of size {}",
                    self.start_offset,
                    self.end_offset,
                    content_blob.len()
                ))
            })?;
        let mut hasher = Md5::new();
        hasher.update(slice);
        let actual = hex::encode(hasher.finalize());
        if actual != self.checksum {
            return Err(ManifestError::CorruptContext(format!(
                "checksum mismatch at [{}, {}): expected {}, got {actual}",
                self.start_offset, self.end_offset, self.checksum
            )));
        }
        Ok(slice)
    }
}

/// Tolerance for the sum-of-file-sizes vs. total_size invariant, to absorb
/// boundary marker bytes between sections.
const TOTAL_SIZE_TOLERANCE: usize = 1024;

/// A fully assembled, in-process view of one repository: everything the
/// VFS and GitSimulator need, built once by RepoCache + ContentIndexer and
/// shared read-only after that.
#[derive(Debug, Clone)]
pub struct RepositoryContext {
    pub repo_url: String,
    pub repo_name: String,
    pub branch: String,
    pub summary: String,
    pub content_blob: Vec<u8>,
    pub tree_text: String,
    pub metadata: BTreeMap<String, String>,
    pub file_index: BTreeMap<String, FileLocation>,
    pub total_files: usize,
    pub total_size: usize,
}

impl RepositoryContext {
    /// Construct and validate. Fails if any of the invariants in the data
    /// model are violated.
    pub fn new(
        repo_url: String,
        repo_name: String,
        branch: String,
        summary: String,
        content_blob: Vec<u8>,
        tree_text: String,
        metadata: BTreeMap<String, String>,
        file_index: BTreeMap<String, FileLocation>,
        total_size: usize,
    ) -> Result<Self> {
        let total_files = file_index.len();
        let ctx = Self {
            repo_url,
            repo_name,
            branch,
            summary,
            content_blob,
            tree_text,
            metadata,
            file_index,
            total_files,
            total_size,
        };
        ctx.validate()?;
        Ok(ctx)
    }

    fn validate(&self) -> Result<()> {
        if self.total_files != self.file_index.len() {
            return Err(ManifestError::CorruptContext(format!(
                "total_files {} does not match file_index length {}",
                self.total_files,
                self.file_index.len()
            )));
        }

        let sum: usize = self.file_index.values().map(|l| l.size).sum();
        let diff = sum.abs_diff(self.total_size);
        if diff > TOTAL_SIZE_TOLERANCE {
            return Err(ManifestError::CorruptContext(format!(
                "sum of file sizes {sum} differs from total_size {} by {diff} bytes, exceeding tolerance of {TOTAL_SIZE_TOLERANCE}",
                self.total_size
            )));
        }

        if self.content_blob.len() < 100 {
            return Err(ManifestError::CorruptContext(format!(
                "content blob is only {} bytes, below the 100 byte corruption floor",
                self.content_blob.len()
            )));
        }

        for (path, loc) in &self.file_index {
            loc.extract(&self.content_blob).map_err(|e| {
                ManifestError::CorruptContext(format!("file index entry {path} invalid: {e}"))
            })?;
        }

        Ok(())
    }
}

/// The typed record behind the `repo:{name}:metadata` wire string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub stored_at: DateTime<Utc>,
    pub repo_name: String,
    pub data_types: BTreeSet<DataType>,
    pub chunked_types: BTreeSet<DataType>,
}

impl RepoMetadata {
    fn fmt_set(set: &BTreeSet<DataType>) -> String {
        set.iter()
            .map(DataType::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }

    fn parse_set(s: &str) -> Result<BTreeSet<DataType>> {
        if s.is_empty() {
            return Ok(BTreeSet::new());
        }
        s.split('|')
            .map(|part| {
                DataType::from_str(part)
                    .map_err(|e| ManifestError::MalformedMetadata(e.to_string()))
            })
            .collect()
    }

    /// Serialize to the `stored_at:…,repo_name:…,data_types:…,chunked_types:…`
    /// comma/colon wire format.
    pub fn to_wire(&self) -> String {
        format!(
            "stored_at:{},repo_name:{},data_types:{},chunked_types:{}",
            self.stored_at.to_rfc3339(),
            self.repo_name,
            Self::fmt_set(&self.data_types),
            Self::fmt_set(&self.chunked_types),
        )
    }

    pub fn from_wire(wire: &str) -> Result<Self> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        for part in wire.split(',') {
            let (key, value) = part.split_once(':').ok_or_else(|| {
                ManifestError::MalformedMetadata(format!("field missing ':' separator: {part}"))
            })?;
            fields.insert(key, value);
        }

        let stored_at = fields
            .get("stored_at")
            .ok_or_else(|| ManifestError::MalformedMetadata("missing stored_at".into()))?;
        let stored_at = DateTime::parse_from_rfc3339(stored_at)
            .map_err(|e| ManifestError::MalformedMetadata(format!("bad stored_at: {e}")))?
            .with_timezone(&Utc);

        let repo_name = fields
            .get("repo_name")
            .ok_or_else(|| ManifestError::MalformedMetadata("missing repo_name".into()))?
            .to_string();

        let data_types = Self::parse_set(fields.get("data_types").unwrap_or(&""))?;
        let chunked_types = Self::parse_set(fields.get("chunked_types").unwrap_or(&""))?;

        Ok(Self {
            stored_at,
            repo_name,
            data_types,
            chunked_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_wire_format() {
        let meta = RepoMetadata {
            stored_at: Utc::now(),
            repo_name: "acme/widgets".to_string(),
            data_types: BTreeSet::from([DataType::Content, DataType::Tree]),
            chunked_types: BTreeSet::from([DataType::Content]),
        };
        let wire = meta.to_wire();
        let back = RepoMetadata::from_wire(&wire).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn empty_type_sets_round_trip() {
        let meta = RepoMetadata {
            stored_at: Utc::now(),
            repo_name: "acme/widgets".to_string(),
            data_types: BTreeSet::new(),
            chunked_types: BTreeSet::new(),
        };
        let back = RepoMetadata::from_wire(&meta.to_wire()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn file_location_extract_verifies_checksum() {
        let blob = b"================================================\nFILE: a.rs\n================================================\nhello world";
        let start = blob.len() - "hello world".len();
        let loc = FileLocation::new(start, blob.len(), &blob[start..]);
        assert_eq!(loc.extract(blob).unwrap(), b"hello world");
    }

    #[test]
    fn file_location_extract_rejects_tampered_blob() {
        let bytes = b"hello world";
        let loc = FileLocation::new(0, bytes.len(), bytes);
        let tampered = b"HELLO world";
        assert!(loc.extract(tampered).is_err());
    }

    #[test]
    fn repository_context_rejects_tiny_blob() {
        let result = RepositoryContext::new(
            "https://github.com/acme/widgets".into(),
            "acme/widgets".into(),
            "main".into(),
            "summary".into(),
            b"short".to_vec(),
            "tree".into(),
            BTreeMap::new(),
            BTreeMap::new(),
            5,
        );
        assert!(result.is_err());
    }
}
