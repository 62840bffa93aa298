//! Bounded, append-only, in-process logs. Thread-safe via a single mutex
//! guarding a ring of the last `capacity` entries — no file I/O, these are
//! purely advisory/diagnostic as kept in memory for the process lifetime.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::{AccessAttempt, ErrorInfo, ServiceIssue};

const DEFAULT_CAPACITY: usize = 50;

pub struct BoundedLog<T> {
    capacity: usize,
    entries: Mutex<VecDeque<T>>,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, item: T) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The three in-process audit logs the rest of the system writes to.
pub struct AuditLog {
    pub access_attempts: BoundedLog<AccessAttempt>,
    pub errors: BoundedLog<ErrorInfo>,
    pub service_issues: BoundedLog<ServiceIssue>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            access_attempts: BoundedLog::new(DEFAULT_CAPACITY),
            errors: BoundedLog::new(DEFAULT_CAPACITY),
            service_issues: BoundedLog::new(DEFAULT_CAPACITY),
        }
    }

    pub fn record_access(&self, attempt: AccessAttempt) {
        self.access_attempts.push(attempt);
    }

    pub fn record_error(&self, error: ErrorInfo) {
        self.errors.push(error);
    }

    pub fn record_service_issue(&self, issue: ServiceIssue) {
        self.service_issues.push(issue);
    }

    /// Service issues with no `resolved_at`, most recent business of the
    /// health report.
    pub fn open_service_issues(&self) -> Vec<ServiceIssue> {
        self.service_issues
            .snapshot()
            .into_iter()
            .filter(|issue| !issue.is_resolved())
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessAttempt, ErrorCategory, ErrorInfo, ServiceIssue, Severity};

    #[test]
    fn bounded_log_evicts_oldest_past_capacity() {
        let log: BoundedLog<u32> = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.snapshot(), vec![2, 3, 4]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn audit_log_caps_each_stream_at_fifty() {
        let log = AuditLog::new();
        for i in 0..60 {
            log.record_access(AccessAttempt::new("free", "acme/widgets", i, true, "ok"));
        }
        assert_eq!(log.access_attempts.len(), 50);
    }

    #[test]
    fn open_service_issues_excludes_resolved() {
        let log = AuditLog::new();
        let mut issue = ServiceIssue::new("vfs", "slow_open", Severity::Low, vec![]);
        log.record_service_issue(issue.clone());
        assert_eq!(log.open_service_issues().len(), 1);

        issue.resolve();
        log.record_service_issue(issue);
        // Two entries now: one unresolved, one resolved (bounded log keeps
        // history, not the latest-per-key).
        assert_eq!(log.open_service_issues().len(), 1);
    }

    #[test]
    fn errors_carry_their_routing_decision() {
        let log = AuditLog::new();
        log.record_error(ErrorInfo::new(ErrorCategory::Auth, "token expired"));
        let errors = log.errors.snapshot();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, Severity::High);
    }
}
