//! Error types for the resilience components
//!
//! Provides one error enum per failure taxonomy using thiserror. Caller
//! supplied errors (compute functions, permission lookups, wrapped
//! operations) are carried verbatim, never re-wrapped as strings.

use thiserror::Error;

// == Breaker Error Enum ==
/// Outcome of a call gated by a [`CircuitBreaker`](crate::breaker::CircuitBreaker).
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the wrapped operation was not invoked
    #[error("circuit breaker is open")]
    Open,

    /// The half-open probe budget is exhausted; the operation was not invoked
    #[error("too many requests while circuit breaker is half-open")]
    TooManyRequests,

    /// The cancellation token fired before the call was admitted
    #[error("operation cancelled")]
    Cancelled,

    /// The wrapped operation ran and failed
    #[error("operation failed: {0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns true for the circuit-open sentinel.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// Returns true when the breaker refused to run the operation at all.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open | BreakerError::TooManyRequests)
    }

    /// Returns the operation's own error, if that is what this is.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(err) => Some(err),
            _ => None,
        }
    }
}

// == Retry Error Enum ==
/// Outcome of [`execute_with_retry`](crate::retry::execute_with_retry).
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Cancellation was observed before an attempt or during a backoff wait
    #[error("retry cancelled")]
    Cancelled,

    /// Error returned by the last attempt
    #[error("{0}")]
    Operation(E),
}

impl<E> RetryError<E> {
    /// Returns the last operation error, or None for cancellation.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Operation(err) => Some(err),
            RetryError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

// == Config Error Enum ==
/// Invalid configuration value read from the environment.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable present but not parseable
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    /// Value parsed but outside the accepted range
    #[error("{name} out of range: {reason}")]
    OutOfRange {
        name: &'static str,
        reason: &'static str,
    },
}

// == Result Type Alias ==
/// Convenience Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
