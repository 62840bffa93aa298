//! Data model, tiered access policy, and repository cache orchestration.
//!
//! This crate sits above `repocache-chunk`: it defines the typed records
//! (`RepositoryContext`, `RepoMetadata`, `TierConfig`) and the `RepoCache`
//! that decides per-blob chunking and manages the four-key-per-repo cache
//! layout.

pub mod error;
pub mod repo_cache;
pub mod tier;
pub mod types;

pub use error::{ManifestError, Result};
pub use repo_cache::{ExistsStatus, RepoBlobs, RepoCache, RepoListEntry};
pub use tier::{AllowedModels, TierConfig, TierDetails, TierPolicy, ValidationResult, UNLIMITED};
pub use types::{DataType, FileLocation, RepoMetadata, RepositoryContext};
