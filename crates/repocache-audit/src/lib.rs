//! Bounded, in-process audit logs for access decisions, classified
//! internal errors, and externally-visible service issues. Nothing here
//! touches disk — these are diagnostic rings kept for the process
//! lifetime, consulted by the health report and the CLI.

pub mod error;
pub mod log;
pub mod types;

pub use error::{AuditError, Result};
pub use log::{AuditLog, BoundedLog};
pub use types::{
    default_policy, AccessAttempt, ErrorCategory, ErrorInfo, RecoveryAction, ServiceIssue,
    Severity,
};
