use thiserror::Error;

use fabline_core::DomainError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Failure of a workflow handler.
///
/// Every variant aborts the handler's transaction. Graceful skips and
/// idempotent no-ops are not errors; they come back as a `Decision`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// Malformed or incomplete event payload.
    #[error("invalid {kind} event: {reason}")]
    Validation { kind: String, reason: String },

    /// An entity the handler cannot work without is missing.
    #[error("{entity} {id} not found")]
    MissingEntity { entity: &'static str, id: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The reader failed to load state.
    #[error("store read failed: {0}")]
    Store(String),
}

impl WorkflowError {
    pub fn validation(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(entity: &'static str, id: impl ToString) -> Self {
        Self::MissingEntity {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller's input is at fault (as opposed to stored state).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WorkflowError::Validation { .. } | WorkflowError::Domain(DomainError::Validation(_))
        )
    }
}
