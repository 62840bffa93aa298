//! Central error classification and recovery dispatch.
//!
//! Every public operation's error funnels through [`ErrorRouter::execute`],
//! which classifies the failure into the ten-kind category table, records
//! an [`ErrorInfo`] in the audit log, and carries out the category's
//! recovery action: absorb (`Ignore`), retry in place (`Retry`), hand off
//! to a [`crate::fallback::FallbackRegistry`] (`Fallback`), or run
//! registered cleanup callbacks before bubbling up (`Cleanup`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use repocache_audit::{default_policy, AuditLog, ErrorCategory, ErrorInfo, RecoveryAction};

use crate::error::CoreError;
use crate::fallback::FallbackRegistry;

/// Substring heuristics for classifying an externally-sourced error
/// string (e.g. a raw Redis error) that never passed through a typed
/// `CoreError` variant. Internally-raised errors use
/// [`CoreError::category`] instead and never reach this function.
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    if lower.contains("auth") || lower.contains("permission denied") || lower.contains("forbidden") {
        ErrorCategory::Auth
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ErrorCategory::Timeout
    } else if lower.contains("connection") || lower.contains("connect") || lower.contains("refused") {
        ErrorCategory::RedisConnection
    } else if lower.contains("out of memory") || lower.contains("oom") {
        ErrorCategory::Memory
    } else if lower.contains("redis") {
        ErrorCategory::RedisOperation
    } else if lower.contains("vfs") || lower.contains("not found") || lower.contains("no such file") {
        ErrorCategory::Vfs
    } else if lower.contains("invalid") || lower.contains("validation") {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

/// A user-facing rendering of an internal [`ErrorInfo`]: a stable `type`
/// and title, a human message, suggested next steps, and whether retry or
/// fallback already happened. Shares `error_id` with the record in the
/// audit log so a support workflow can correlate the two.
#[derive(Debug, Clone)]
pub struct UserFacingError {
    pub error_id: String,
    pub error_type: &'static str,
    pub title: &'static str,
    pub message: String,
    pub suggested_actions: Vec<&'static str>,
    pub retry_available: bool,
    pub fallback_available: bool,
    pub estimated_resolution_time: Option<Duration>,
}

fn user_facing_template(category: ErrorCategory) -> (&'static str, &'static str, Vec<&'static str>, Option<Duration>) {
    use ErrorCategory::*;
    match category {
        RedisConnection => (
            "cache_unavailable",
            "Repository cache is temporarily unreachable",
            vec!["Retry the request", "Check cache endpoint connectivity"],
            Some(Duration::from_secs(60)),
        ),
        RedisOperation => (
            "cache_operation_failed",
            "A cache operation failed",
            vec!["Retry the request", "Fall back to a fresh fetch"],
            Some(Duration::from_secs(30)),
        ),
        CosmosInit => (
            "backing_store_init_failed",
            "A backing data store failed to initialize",
            vec!["Retry shortly", "Contact support if this persists"],
            Some(Duration::from_secs(120)),
        ),
        CosmosProcessing => (
            "backing_store_processing_failed",
            "A backing data store operation failed",
            vec!["Retry the request"],
            Some(Duration::from_secs(30)),
        ),
        Vfs => (
            "file_access_failed",
            "A file could not be read from the cached repository",
            vec!["Verify the path exists", "Re-ingest the repository"],
            None,
        ),
        Memory => (
            "resource_exhausted",
            "The service ran out of a bounded resource",
            vec!["Retry with a smaller request", "Contact support"],
            Some(Duration::from_secs(300)),
        ),
        Timeout => (
            "operation_timed_out",
            "The operation took too long",
            vec!["Retry the request", "Try a smaller repository or branch"],
            Some(Duration::from_secs(30)),
        ),
        Auth => (
            "authentication_failed",
            "Authentication or authorization failed",
            vec!["Check credentials", "Request access for this tier"],
            None,
        ),
        Validation => (
            "invalid_request",
            "The request was not valid",
            vec!["Check the repository URL and branch", "Check the tier name"],
            None,
        ),
        Unknown => (
            "unexpected_error",
            "An unexpected error occurred",
            vec!["Retry the request", "Contact support if this persists"],
            None,
        ),
    }
}

fn to_user_facing(info: &ErrorInfo) -> UserFacingError {
    let (error_type, title, suggested_actions, estimated_resolution_time) =
        user_facing_template(info.category);
    let (_, action) = default_policy(info.category);
    UserFacingError {
        error_id: info.error_id.clone(),
        error_type,
        title,
        message: info.message.clone(),
        suggested_actions,
        retry_available: matches!(action, RecoveryAction::Retry),
        fallback_available: matches!(action, RecoveryAction::Fallback),
        estimated_resolution_time,
    }
}

pub struct ErrorRouter<'a> {
    audit: &'a AuditLog,
    cleanup_callbacks: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl<'a> ErrorRouter<'a> {
    pub fn new(audit: &'a AuditLog) -> Self {
        Self { audit, cleanup_callbacks: Mutex::new(Vec::new()) }
    }

    /// Register a callback run (in registration order) whenever a
    /// `Critical` error triggers the `Cleanup` recovery action.
    pub async fn register_cleanup(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.cleanup_callbacks.lock().await.push(Arc::new(callback));
    }

    async fn run_cleanup(&self) {
        for callback in self.cleanup_callbacks.lock().await.iter() {
            callback();
        }
    }

    /// Run `op`, classifying and routing any failure per the category
    /// table. Returns `Ok(None)` for an absorbed (`Ignore`) error,
    /// `Ok(Some(value))` on success (including a successful fallback), and
    /// `Err` once retries and fallbacks are exhausted for a High/Critical
    /// error.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        max_retries: u32,
        fallback: Option<&FallbackRegistry<T>>,
        op: F,
    ) -> Result<Option<T>, CoreError>
    where
        T: Send + 'static,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    let category = err.category();
                    let (_, action) = default_policy(category);
                    let info = ErrorInfo::new(category, err.to_string()).with_retry_count(attempt - 1);
                    self.audit.record_error(info);

                    match action {
                        RecoveryAction::Ignore => return Ok(None),
                        RecoveryAction::Retry if attempt <= max_retries => {
                            warn!(operation, attempt, "retrying after a recoverable error");
                            continue;
                        }
                        RecoveryAction::Fallback => {
                            let Some(registry) = fallback else { return Err(err) };
                            return registry
                                .execute(operation, || async { op().await.map_err(|e| anyhow::anyhow!(e)) })
                                .await
                                .map(Some)
                                .map_err(CoreError::Cache);
                        }
                        RecoveryAction::Cleanup => {
                            self.run_cleanup().await;
                            return Err(err);
                        }
                        RecoveryAction::Retry | RecoveryAction::Reset | RecoveryAction::Abort => {
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    pub fn user_facing(&self, info: &ErrorInfo) -> UserFacingError {
        to_user_facing(info)
    }
}
