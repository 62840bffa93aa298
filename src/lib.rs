/*!
 * Repository caching and virtual-access subsystem.
 *
 * Sits between a code-analysis assistant and remote source repositories:
 * ingests a repo once per fingerprint, stores its content/tree/summary
 * chunked across a Redis-protocol cache, enforces per-tier token limits,
 * and exposes the cached result through a virtual file system without
 * ever re-cloning the remote repo for a read.
 */

pub mod cache_client;
pub mod config;
pub mod error;
pub mod error_router;
pub mod fallback;
pub mod health;
pub mod ingest;
pub mod logging;
pub mod tier_policy;

// Re-export the workspace crates this subsystem is built on, under names
// that read as part of this crate rather than as independent libraries.
pub use repocache_audit as audit;
pub use repocache_chunk as chunk;
pub use repocache_index as index;
pub use repocache_manifest as manifest;
pub use repocache_resilience as resilience;
pub use repocache_vfs as vfs;

pub use cache_client::CacheClient;
pub use config::{CacheConfig, CoreConfig, TierLimits};
pub use error::{CoreError, Result};
pub use error_router::{classify_message, ErrorRouter, UserFacingError};
pub use fallback::{FallbackRegistry, FallbackStats};
pub use health::{health_report, HealthReport, Status};
pub use ingest::{IngestOutcome, IngestPipeline, IngestedRepo, RepoIngester};
pub use tier_policy::GatedTierPolicy;
