//! Error types for the resilience primitives

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors surfaced by the circuit breaker, connection pool, and retry loop
#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    /// Circuit is open; the call failed fast without attempting the operation
    #[error("circuit is open")]
    CircuitOpen,

    /// Waiting for a pool permit exceeded the configured acquire timeout
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// The pool could not hand out a connection (semaphore closed)
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A transient failure, worth retrying
    #[error("transient error: {0}")]
    Transient(String),

    /// A permanent failure; retrying would not help
    #[error("permanent error: {0}")]
    Permanent(String),

    /// All configured retry attempts were exhausted
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl ResilienceError {
    /// Transient errors are retried by `CircuitBreaker::execute`.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResilienceError::Transient(_) | ResilienceError::Timeout(_))
    }

    /// Permanent errors stop the retry loop immediately.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ResilienceError::Permanent(_))
    }

    /// Whether a failure of this kind should count against the breaker's
    /// failure threshold. Pool exhaustion and explicit circuit-open results
    /// are bookkeeping, not new evidence of an unhealthy backend.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(self, ResilienceError::CircuitOpen | ResilienceError::PoolExhausted)
    }
}
