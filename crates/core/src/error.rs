//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures raised by domain types themselves.
///
/// Missing documents are not domain errors: handlers report them as
/// `WorkflowError::MissingEntity` and stores as `StoreError::NotFound`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or incomplete input (payload fields, quantities).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A quantity or ledger rule would be broken (e.g. overdrawing a stock position).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Empty or malformed catalog identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stored version did not match the expected one.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
