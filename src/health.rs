//! A point-in-time health snapshot pulling together the cache pool's
//! utilization, the circuit breaker's state, any open service issues, and
//! fallback success rates — everything an operator or a `/health`
//! endpoint needs without reaching into each subsystem directly.

use serde::Serialize;

use repocache_audit::{AuditLog, ServiceIssue};
use repocache_resilience::{CircuitState, PoolStats};

use crate::cache_client::CacheClient;
use crate::fallback::FallbackStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub circuit_closed: bool,
    pub pool_idle: usize,
    pub pool_active: usize,
    pub pool_utilization_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub cache: CacheHealth,
    pub open_service_issues: Vec<ServiceIssueSummary>,
    pub recent_error_count: usize,
    pub fallback_stats: Vec<(String, Vec<FallbackStatsSummary>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceIssueSummary {
    pub component: String,
    pub issue_type: String,
    pub impact_level: String,
    pub workaround: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatsSummary {
    pub name: String,
    pub success_rate: f64,
    pub avg_exec_time_ms: u128,
}

fn cache_health(circuit: CircuitState, stats: PoolStats) -> CacheHealth {
    CacheHealth {
        circuit_closed: matches!(circuit, CircuitState::Closed),
        pool_idle: stats.idle,
        pool_active: stats.active,
        pool_utilization_pct: stats.utilization(),
    }
}

fn overall_status(cache: &CacheHealth, open_issues: &[ServiceIssueSummary]) -> Status {
    if !cache.circuit_closed {
        return Status::Unhealthy;
    }
    let critical_issue = open_issues
        .iter()
        .any(|issue| issue.impact_level == "critical" || issue.impact_level == "high");
    if critical_issue {
        Status::Degraded
    } else if open_issues.is_empty() {
        Status::Healthy
    } else {
        Status::Degraded
    }
}

/// Assemble a [`HealthReport`] from the cache client's live state, the
/// audit log's open issues and recent errors, and each fallback
/// registry's rolling stats for the operations the caller names.
pub async fn health_report(
    cache: &CacheClient,
    audit: &AuditLog,
    fallback_stats: Vec<(String, Vec<FallbackStats>)>,
) -> HealthReport {
    let circuit = cache.circuit_state().await;
    let pool_stats = cache.pool_stats().await;
    let cache_health = cache_health(circuit, pool_stats);

    let open_service_issues: Vec<ServiceIssueSummary> = audit
        .open_service_issues()
        .into_iter()
        .map(summarize_issue)
        .collect();

    let fallback_stats = fallback_stats
        .into_iter()
        .map(|(operation, entries)| {
            let summaries = entries
                .into_iter()
                .map(|e| FallbackStatsSummary {
                    name: e.name,
                    success_rate: e.success_rate,
                    avg_exec_time_ms: e.avg_exec_time.as_millis(),
                })
                .collect();
            (operation, summaries)
        })
        .collect();

    let status = overall_status(&cache_health, &open_service_issues);

    HealthReport {
        status,
        cache: cache_health,
        open_service_issues,
        recent_error_count: audit.errors.len(),
        fallback_stats,
    }
}

fn summarize_issue(issue: ServiceIssue) -> ServiceIssueSummary {
    ServiceIssueSummary {
        component: issue.component,
        issue_type: issue.issue_type,
        impact_level: format!("{:?}", issue.impact_level).to_lowercase(),
        workaround: issue.workaround,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repocache_resilience::PoolStats;
    use std::time::Instant;

    #[test]
    fn closed_circuit_with_no_issues_is_healthy() {
        let stats = PoolStats { idle: 2, active: 0, total: 2, max_size: 10 };
        let health = cache_health(CircuitState::Closed, stats);
        assert_eq!(overall_status(&health, &[]), Status::Healthy);
    }

    #[test]
    fn open_circuit_is_unhealthy_regardless_of_issues() {
        let stats = PoolStats { idle: 0, active: 0, total: 0, max_size: 10 };
        let health = cache_health(CircuitState::Open { next_probe: Instant::now() }, stats);
        assert_eq!(overall_status(&health, &[]), Status::Unhealthy);
    }

    #[test]
    fn open_low_severity_issue_degrades_closed_circuit() {
        let stats = PoolStats { idle: 2, active: 0, total: 2, max_size: 10 };
        let health = cache_health(CircuitState::Closed, stats);
        let issues = vec![ServiceIssueSummary {
            component: "vfs".to_string(),
            issue_type: "slow_open".to_string(),
            impact_level: "low".to_string(),
            workaround: None,
        }];
        assert_eq!(overall_status(&health, &issues), Status::Degraded);
    }
}
