use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("unknown error category: {0}")]
    UnknownCategory(String),

    #[error("unknown recovery action: {0}")]
    UnknownRecoveryAction(String),
}
