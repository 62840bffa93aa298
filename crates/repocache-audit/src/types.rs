//! Audit record types: access decisions, classified internal errors, and
//! externally-visible service issues.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessAttempt {
    pub timestamp: DateTime<Utc>,
    pub user_tier: String,
    pub repo_url: String,
    pub estimated_tokens: i64,
    pub allowed: bool,
    pub message: String,
    pub user_id: Option<String>,
}

impl AccessAttempt {
    pub fn new(
        user_tier: impl Into<String>,
        repo_url: impl Into<String>,
        estimated_tokens: i64,
        allowed: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_tier: user_tier.into(),
            repo_url: repo_url.into(),
            estimated_tokens,
            allowed,
            message: message.into(),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RedisConnection,
    RedisOperation,
    CosmosInit,
    CosmosProcessing,
    Vfs,
    Memory,
    Timeout,
    Auth,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RedisConnection => "redis_connection",
            ErrorCategory::RedisOperation => "redis_operation",
            ErrorCategory::CosmosInit => "cosmos_init",
            ErrorCategory::CosmosProcessing => "cosmos_processing",
            ErrorCategory::Vfs => "vfs",
            ErrorCategory::Memory => "memory",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl FromStr for ErrorCategory {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "redis_connection" => ErrorCategory::RedisConnection,
            "redis_operation" => ErrorCategory::RedisOperation,
            "cosmos_init" => ErrorCategory::CosmosInit,
            "cosmos_processing" => ErrorCategory::CosmosProcessing,
            "vfs" => ErrorCategory::Vfs,
            "memory" => ErrorCategory::Memory,
            "timeout" => ErrorCategory::Timeout,
            "auth" => ErrorCategory::Auth,
            "validation" => ErrorCategory::Validation,
            "unknown" => ErrorCategory::Unknown,
            other => return Err(AuditError::UnknownCategory(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Fallback,
    Reset,
    Cleanup,
    Abort,
    Ignore,
}

/// The category → (severity, action) policy table. `Unknown`/anything not
/// matched by the router's classifier defaults to `Medium`/`Retry`.
pub fn default_policy(category: ErrorCategory) -> (Severity, RecoveryAction) {
    use ErrorCategory::*;
    match category {
        RedisConnection => (Severity::High, RecoveryAction::Retry),
        RedisOperation => (Severity::Medium, RecoveryAction::Fallback),
        CosmosInit => (Severity::High, RecoveryAction::Reset),
        CosmosProcessing => (Severity::Medium, RecoveryAction::Fallback),
        Vfs => (Severity::Low, RecoveryAction::Fallback),
        Memory => (Severity::Critical, RecoveryAction::Cleanup),
        Timeout => (Severity::Medium, RecoveryAction::Retry),
        Auth => (Severity::High, RecoveryAction::Abort),
        Validation => (Severity::Low, RecoveryAction::Ignore),
        Unknown => (Severity::Medium, RecoveryAction::Retry),
    }
}

static ERROR_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub message: String,
    pub stack: Option<String>,
    pub context: BTreeMap<String, String>,
    pub recovery_action: RecoveryAction,
    pub retry_count: u32,
}

impl ErrorInfo {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let (severity, recovery_action) = default_policy(category);
        let seq = ERROR_SEQ.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now();
        Self {
            error_id: format!("err-{}-{seq}", timestamp.timestamp_millis()),
            timestamp,
            category,
            severity,
            message: message.into(),
            stack: None,
            context: BTreeMap::new(),
            recovery_action,
            retry_count: 0,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIssue {
    pub component: String,
    pub issue_type: String,
    pub impact_level: Severity,
    pub affected_features: Vec<String>,
    pub workaround: Option<String>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ServiceIssue {
    pub fn new(
        component: impl Into<String>,
        issue_type: impl Into<String>,
        impact_level: Severity,
        affected_features: Vec<String>,
    ) -> Self {
        Self {
            component: component.into(),
            issue_type: issue_type.into(),
            impact_level,
            affected_features,
            workaround: None,
            started_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_workaround(mut self, workaround: impl Into<String>) -> Self {
        self.workaround = Some(workaround.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    pub fn resolve(&mut self) {
        self.resolved_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_category_round_trips_through_str() {
        for cat in [
            ErrorCategory::RedisConnection,
            ErrorCategory::Memory,
            ErrorCategory::Auth,
            ErrorCategory::Unknown,
        ] {
            let parsed = ErrorCategory::from_str(cat.as_str()).unwrap();
            assert_eq!(parsed.as_str(), cat.as_str());
        }
    }

    #[test]
    fn unknown_category_string_is_rejected() {
        assert!(ErrorCategory::from_str("bogus").is_err());
    }

    #[test]
    fn default_policy_matches_table() {
        assert_eq!(
            default_policy(ErrorCategory::Memory),
            (Severity::Critical, RecoveryAction::Cleanup)
        );
        assert_eq!(
            default_policy(ErrorCategory::Validation),
            (Severity::Low, RecoveryAction::Ignore)
        );
    }

    #[test]
    fn error_info_ids_are_unique() {
        let a = ErrorInfo::new(ErrorCategory::Timeout, "slow");
        let b = ErrorInfo::new(ErrorCategory::Timeout, "slow again");
        assert_ne!(a.error_id, b.error_id);
        assert_eq!(a.recovery_action, RecoveryAction::Retry);
    }

    #[test]
    fn service_issue_resolution() {
        let mut issue = ServiceIssue::new(
            "cache_client",
            "connection_pool_exhausted",
            Severity::High,
            vec!["repo_fetch".to_string()],
        );
        assert!(!issue.is_resolved());
        issue.resolve();
        assert!(issue.is_resolved());
    }
}
