//! Fixed-size chunking: splits a blob at exact byte boundaries and computes
//! the checksums `ChunkStore` needs to reconstruct and verify it later.
//!
//! Unlike content-defined chunking, boundaries here are simple multiples of
//! `CHUNK_SIZE` — the point is bounding command size to the key/value
//! store, not deduplication.

use chrono::{DateTime, Utc};
use md5::{Digest as Md5Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha256Digest, Sha256};

use crate::error::{ChunkError, Result};

/// Any blob larger than this must be stored in chunks (§4.B).
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Kind of blob being chunked, also used as the cache key's type segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Content,
    Tree,
    Summary,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Content => "content",
            DataType::Tree => "tree",
            DataType::Summary => "summary",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = ChunkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "content" => Ok(DataType::Content),
            "tree" => Ok(DataType::Tree),
            "summary" => Ok(DataType::Summary),
            other => Err(ChunkError::MalformedDescriptor(format!(
                "unknown data type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One physical piece of a chunked blob.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub bytes: Vec<u8>,
    /// Hex-encoded MD5 of `bytes`, for fast per-chunk verification.
    pub checksum: String,
}

/// Stored alongside the chunks as a single metadata record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub total_size: u64,
    pub chunk_count: usize,
    pub chunk_size: usize,
    /// Hex-encoded SHA-256 over the whole original byte string.
    pub sha256_checksum: String,
    pub data_type: DataType,
    pub chunked_at: DateTime<Utc>,
}

/// True iff `data` must be chunked: `utf8_len(data) > CHUNK_SIZE`.
///
/// A blob whose length is exactly `CHUNK_SIZE` is NOT chunked (ceiling
/// rule, §8): only `CHUNK_SIZE + 1` and above are.
pub fn should_chunk(data: &[u8]) -> bool {
    data.len() > CHUNK_SIZE
}

/// Split `data` into `CHUNK_SIZE`-bounded chunks at exact byte boundaries
/// (never at UTF-8 code-point boundaries — reconstruction rejoins the raw
/// bytes before any decoding happens) and compute both per-chunk and
/// overall checksums.
pub fn chunk(data: &[u8], data_type: DataType) -> (Vec<Chunk>, ChunkDescriptor) {
    let mut overall = Sha256::new();
    overall.update(data);
    let sha256_checksum = hex::encode(overall.finalize());

    let chunks: Vec<Chunk> = data
        .chunks(CHUNK_SIZE)
        .enumerate()
        .map(|(index, bytes)| {
            let mut md5 = Md5::new();
            md5.update(bytes);
            Chunk {
                index,
                bytes: bytes.to_vec(),
                checksum: hex::encode(md5.finalize()),
            }
        })
        .collect();

    let descriptor = ChunkDescriptor {
        total_size: data.len() as u64,
        chunk_count: chunks.len(),
        chunk_size: CHUNK_SIZE,
        sha256_checksum,
        data_type,
        chunked_at: Utc::now(),
    };

    (chunks, descriptor)
}

/// Verify a single chunk's bytes against its stored checksum.
pub fn verify_chunk(index: usize, bytes: &[u8], expected_checksum: &str) -> Result<()> {
    let mut md5 = Md5::new();
    md5.update(bytes);
    let actual = hex::encode(md5.finalize());
    if actual != expected_checksum {
        return Err(ChunkError::ChunkChecksumMismatch {
            index,
            expected: expected_checksum.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Concatenate ordered chunk bytes and verify the overall SHA-256.
pub fn reconstruct(ordered_chunks: Vec<Vec<u8>>, descriptor: &ChunkDescriptor) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(descriptor.total_size as usize);
    for chunk in ordered_chunks {
        data.extend_from_slice(&chunk);
    }

    let mut hasher = Sha256::new();
    hasher.update(&data);
    let actual = hex::encode(hasher.finalize());
    if actual != descriptor.sha256_checksum {
        return Err(ChunkError::OverallChecksumMismatch {
            expected: descriptor.sha256_checksum.clone(),
            actual,
        });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_chunk_size_is_not_chunked() {
        let data = vec![0u8; CHUNK_SIZE];
        assert!(!should_chunk(&data));
    }

    #[test]
    fn one_byte_over_is_chunked() {
        let data = vec![0u8; CHUNK_SIZE + 1];
        assert!(should_chunk(&data));
    }

    #[test]
    fn chunk_and_reconstruct_round_trip() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 512];
        let (chunks, descriptor) = chunk(&data, DataType::Content);
        assert_eq!(descriptor.chunk_count, 4);
        assert_eq!(chunks.len(), 4);

        for c in &chunks {
            verify_chunk(c.index, &c.bytes, &c.checksum).unwrap();
        }

        let ordered: Vec<Vec<u8>> = chunks.into_iter().map(|c| c.bytes).collect();
        let rebuilt = reconstruct(ordered, &descriptor).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn corrupt_chunk_fails_checksum() {
        let data = vec![9u8; CHUNK_SIZE + 10];
        let (mut chunks, descriptor) = chunk(&data, DataType::Tree);
        chunks[0].bytes[0] ^= 0xFF;

        assert!(verify_chunk(chunks[0].index, &chunks[0].bytes, &chunks[0].checksum).is_err());

        let ordered: Vec<Vec<u8>> = chunks.into_iter().map(|c| c.bytes).collect();
        assert!(reconstruct(ordered, &descriptor).is_err());
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

        /// Chunking arbitrary bytes and reconstructing in order always
        /// recovers the original data, whether or not it needed chunking.
        #[test]
        fn chunk_reconstruct_round_trips_arbitrary_bytes(data in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..(CHUNK_SIZE * 2 + 137))) {
            let (chunks, descriptor) = chunk(&data, DataType::Content);
            proptest::prop_assert_eq!(descriptor.chunk_count, chunks.len());
            proptest::prop_assert_eq!(descriptor.total_size, data.len() as u64);

            for c in &chunks {
                proptest::prop_assert!(verify_chunk(c.index, &c.bytes, &c.checksum).is_ok());
            }

            let ordered: Vec<Vec<u8>> = chunks.into_iter().map(|c| c.bytes).collect();
            let rebuilt = reconstruct(ordered, &descriptor).unwrap();
            proptest::prop_assert_eq!(rebuilt, data);
        }
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let data = vec![1u8; 16];
        let (_chunks, descriptor) = chunk(&data, DataType::Summary);
        let json = serde_json::to_string(&descriptor).unwrap();
        let back: ChunkDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sha256_checksum, descriptor.sha256_checksum);
        assert_eq!(back.data_type, descriptor.data_type);
    }
}
