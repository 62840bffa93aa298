//! Access-control wrapper around [`repocache_manifest::TierPolicy`] that
//! records every decision as an [`repocache_audit::AccessAttempt`].
//!
//! `TierPolicy` itself is pure: it has no notion of logging. This module is
//! the seam where tier validation meets the audit trail, so callers get one
//! place to check "can this tier ingest this repo" that always leaves a
//! trace behind, whether the user_id is known or not.

use repocache_audit::AccessAttempt;
use repocache_manifest::{TierDetails, TierPolicy, ValidationResult};

use crate::error::{CoreError, Result};

pub struct GatedTierPolicy<'a> {
    policy: TierPolicy,
    audit: &'a repocache_audit::AuditLog,
}

impl<'a> GatedTierPolicy<'a> {
    pub fn with_defaults(audit: &'a repocache_audit::AuditLog) -> Result<Self> {
        Ok(Self {
            policy: TierPolicy::with_defaults().map_err(CoreError::Manifest)?,
            audit,
        })
    }

    /// Validate a tier/token-estimate pair, recording the outcome in the
    /// audit log regardless of which way it comes out.
    pub fn validate(
        &self,
        tier: &str,
        repo_url: &str,
        estimated_tokens: i64,
        user_id: Option<&str>,
    ) -> Result<ValidationResult> {
        let result = self
            .policy
            .validate(tier, estimated_tokens)
            .map_err(CoreError::Manifest)?;

        let mut attempt =
            AccessAttempt::new(tier, repo_url, estimated_tokens, result.allowed, &result.message);
        if let Some(user_id) = user_id {
            attempt = attempt.with_user_id(user_id);
        }
        self.audit.record_access(attempt);

        Ok(result)
    }

    /// Validate and, on denial, turn it directly into a `CoreError` so
    /// callers that just want a yes/no gate don't have to inspect
    /// `ValidationResult` themselves.
    pub fn enforce(
        &self,
        tier: &str,
        repo_url: &str,
        estimated_tokens: i64,
        user_id: Option<&str>,
    ) -> Result<()> {
        let result = self.validate(tier, repo_url, estimated_tokens, user_id)?;
        if result.allowed {
            Ok(())
        } else {
            Err(CoreError::AccessDenied {
                tier: tier.to_string(),
                message: result.message,
            })
        }
    }

    pub fn details(&self, tier: &str, estimated_tokens: i64) -> Result<TierDetails> {
        self.policy
            .details(tier, estimated_tokens)
            .map_err(CoreError::Manifest)
    }

    pub fn available_tiers(&self) -> Vec<String> {
        self.policy.available_tiers()
    }
}
