//! Tiered access control: `TierConfig` records and the `TierPolicy` that
//! validates repository token estimates against them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, Result};

/// Sentinel for "no limit" on any `i64` limit field, matching the
/// original system's convention.
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedModels {
    All,
    Restricted(BTreeSet<String>),
}

impl AllowedModels {
    pub fn allows(&self, model: &str) -> bool {
        match self {
            AllowedModels::All => true,
            AllowedModels::Restricted(set) => set.contains(model),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub max_repository_tokens: i64,
    pub max_requests_per_month: i64,
    pub max_requests_per_hour: i64,
    pub max_context_files: i64,
    pub max_session_duration_hours: i64,
    pub max_concurrent_sessions: i64,
    pub allowed_models: AllowedModels,
    pub features: Vec<String>,
}

impl TierConfig {
    fn effective_limit(&self) -> f64 {
        if self.max_repository_tokens == UNLIMITED {
            f64::INFINITY
        } else {
            self.max_repository_tokens as f64
        }
    }

    fn free() -> Self {
        Self {
            name: "free".to_string(),
            display_name: "Free".to_string(),
            description: "Personal use with basic limits".to_string(),
            max_repository_tokens: 1_000_000,
            max_requests_per_month: 500,
            max_requests_per_hour: 20,
            max_context_files: 10,
            max_session_duration_hours: 1,
            max_concurrent_sessions: 1,
            allowed_models: AllowedModels::Restricted(BTreeSet::from([
                "gpt-4o-mini".to_string(),
            ])),
            features: vec!["basic_search".to_string()],
        }
    }

    fn pro() -> Self {
        Self {
            name: "pro".to_string(),
            display_name: "Pro".to_string(),
            description: "For individual professional use".to_string(),
            max_repository_tokens: 10_000_000,
            max_requests_per_month: 2_000,
            max_requests_per_hour: 100,
            max_context_files: 50,
            max_session_duration_hours: 8,
            max_concurrent_sessions: 3,
            allowed_models: AllowedModels::Restricted(BTreeSet::from([
                "gpt-4o-mini".to_string(),
                "gpt-4o".to_string(),
            ])),
            features: vec!["basic_search".to_string(), "priority_queue".to_string()],
        }
    }

    fn enterprise() -> Self {
        Self {
            name: "enterprise".to_string(),
            display_name: "Enterprise".to_string(),
            description: "Unlimited usage for organizations".to_string(),
            max_repository_tokens: UNLIMITED,
            max_requests_per_month: 3_000,
            max_requests_per_hour: UNLIMITED,
            max_context_files: 200,
            max_session_duration_hours: UNLIMITED,
            max_concurrent_sessions: UNLIMITED,
            allowed_models: AllowedModels::All,
            features: vec![
                "basic_search".to_string(),
                "priority_queue".to_string(),
                "dedicated_support".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub allowed: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierDetails {
    pub allowed: bool,
    pub message: String,
    pub tier_limit: i64,
    /// `None` when the tier is unlimited.
    pub usage_pct: Option<f64>,
    pub available_tiers: Vec<String>,
}

/// Holds the three built-in tiers (or a caller-supplied replacement set)
/// and enforces the strictly-ascending-limits invariant at construction.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    tiers: Vec<TierConfig>,
}

impl TierPolicy {
    /// Build from the three built-in tiers (FREE, PRO, ENTERPRISE).
    pub fn with_defaults() -> Result<Self> {
        Self::new(vec![TierConfig::free(), TierConfig::pro(), TierConfig::enterprise()])
    }

    /// Build from an explicit ordered list of tiers, validating that
    /// `max_repository_tokens` is non-decreasing (UNLIMITED compares as
    /// infinite, so equality with an unlimited tier is allowed).
    pub fn new(tiers: Vec<TierConfig>) -> Result<Self> {
        for window in tiers.windows(2) {
            let (a, b) = (&window[0], &window[1]);
            if a.effective_limit() > b.effective_limit() {
                return Err(ManifestError::InvalidTierConfig(format!(
                    "tier {} (limit {}) exceeds tier {} (limit {}); tiers must be non-decreasing",
                    a.name, a.max_repository_tokens, b.name, b.max_repository_tokens
                )));
            }
        }
        Ok(Self { tiers })
    }

    fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    fn find(&self, name: &str) -> Option<&TierConfig> {
        let normalized = Self::normalize(name);
        self.tiers.iter().find(|t| t.name == normalized)
    }

    pub fn available_tiers(&self) -> Vec<String> {
        self.tiers.iter().map(|t| t.name.clone()).collect()
    }

    /// `Validate(tier, estimated_tokens) -> (allowed, message)`.
    pub fn validate(&self, tier: &str, estimated_tokens: i64) -> Result<ValidationResult> {
        if estimated_tokens < 0 {
            return Err(ManifestError::NegativeTokens(estimated_tokens));
        }

        let Some(config) = self.find(tier) else {
            return Ok(ValidationResult {
                allowed: false,
                message: format!(
                    "unknown tier '{tier}', available tiers: {}",
                    self.available_tiers().join(", ")
                ),
            });
        };

        let allowed = config.max_repository_tokens == UNLIMITED
            || estimated_tokens <= config.max_repository_tokens;

        let message = if allowed {
            format!(
                "{} tokens within {} limit",
                estimated_tokens, config.display_name
            )
        } else {
            format!(
                "{} tokens exceeds {} limit of {}",
                estimated_tokens, config.display_name, config.max_repository_tokens
            )
        };

        Ok(ValidationResult { allowed, message })
    }

    /// `Details(tier, tokens) -> {allowed, message, tier_limit, usage_pct, available_tiers[]}`.
    pub fn details(&self, tier: &str, estimated_tokens: i64) -> Result<TierDetails> {
        let validation = self.validate(tier, estimated_tokens)?;
        let config = self.find(tier);

        let tier_limit = config.map(|c| c.max_repository_tokens).unwrap_or(0);
        let usage_pct = config.and_then(|c| {
            if c.max_repository_tokens == UNLIMITED {
                None
            } else if c.max_repository_tokens == 0 {
                Some(0.0)
            } else {
                Some(estimated_tokens as f64 / c.max_repository_tokens as f64 * 100.0)
            }
        });

        Ok(TierDetails {
            allowed: validation.allowed,
            message: validation.message,
            tier_limit,
            usage_pct,
            available_tiers: self.available_tiers(),
        })
    }

    pub fn config_for(&self, tier: &str) -> Option<&TierConfig> {
        self.find(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_are_strictly_ascending() {
        let policy = TierPolicy::with_defaults().unwrap();
        assert_eq!(policy.available_tiers(), vec!["free", "pro", "enterprise"]);
    }

    #[test]
    fn enterprise_is_unlimited() {
        let policy = TierPolicy::with_defaults().unwrap();
        let result = policy.validate("enterprise", 50_000_000).unwrap();
        assert!(result.allowed);
    }

    #[test]
    fn free_tier_rejects_over_limit() {
        let policy = TierPolicy::with_defaults().unwrap();
        let result = policy.validate("free", 2_000_000).unwrap();
        assert!(!result.allowed);
    }

    #[test]
    fn tier_name_is_normalized() {
        let policy = TierPolicy::with_defaults().unwrap();
        let result = policy.validate("  FREE  ", 100).unwrap();
        assert!(result.allowed);
    }

    #[test]
    fn unknown_tier_enumerates_available_tiers() {
        let policy = TierPolicy::with_defaults().unwrap();
        let result = policy.validate("ultra", 10).unwrap();
        assert!(!result.allowed);
        assert!(result.message.contains("free"));
        assert!(result.message.contains("pro"));
        assert!(result.message.contains("enterprise"));
    }

    #[test]
    fn negative_tokens_is_an_error() {
        let policy = TierPolicy::with_defaults().unwrap();
        assert!(policy.validate("free", -1).is_err());
    }

    #[test]
    fn descending_limits_are_rejected_at_construction() {
        let mut tiers = vec![TierConfig::pro(), TierConfig::free()];
        tiers[0].max_repository_tokens = 10_000_000;
        tiers[1].max_repository_tokens = 1_000_000;
        assert!(TierPolicy::new(tiers).is_err());
    }

    #[test]
    fn usage_pct_is_none_for_unlimited_tier() {
        let policy = TierPolicy::with_defaults().unwrap();
        let details = policy.details("enterprise", 5_000_000).unwrap();
        assert_eq!(details.usage_pct, None);
    }

    fn tier_named(name: &str, limit: i64) -> TierConfig {
        let mut config = TierConfig::free();
        config.name = name.to_string();
        config.max_repository_tokens = limit;
        config
    }

    use proptest::prelude::*;

    proptest! {
        /// Construction succeeds iff the two limits are non-decreasing
        /// (treating `UNLIMITED` as infinite); whenever it succeeds, a
        /// token estimate exactly at the lower tier's limit validates
        /// against that tier.
        #[test]
        fn two_tier_policy_is_ascending_iff_construction_succeeds(
            low in -1i64..=20_000_000i64,
            high in -1i64..=20_000_000i64,
        ) {
            let effective = |v: i64| if v == UNLIMITED { f64::INFINITY } else { v as f64 };
            let tiers = vec![tier_named("lower", low), tier_named("higher", high)];
            let result = TierPolicy::new(tiers);

            if effective(low) > effective(high) {
                prop_assert!(result.is_err());
            } else {
                let policy = result.unwrap();
                if low != UNLIMITED {
                    let at_limit = policy.validate("lower", low).unwrap();
                    prop_assert!(at_limit.allowed);
                }
                if low != UNLIMITED && low < i64::MAX - 1 {
                    let over_limit = policy.validate("lower", low + 1).unwrap();
                    prop_assert!(!over_limit.allowed);
                }
            }
        }
    }
}
