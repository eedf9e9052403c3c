use thiserror::Error;

use osas_core::RejectionCode;

use crate::command_dispatcher::DispatchError;
use crate::jobs::LeaseError;
use crate::projections::ProjectionError;

/// Failure of an engine operation.
///
/// Business rejections arrive as `Dispatch(DispatchError::Rejected { .. })`
/// and keep their stable code; everything else is infrastructure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// An id the caller supplied does not resolve to any ledger entity.
    #[error("{kind} {id} not found")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Another invocation holds the single-flight key for this scope.
    #[error("{key} is already running")]
    InFlight { key: String },

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl EngineError {
    pub(crate) fn unknown(kind: &'static str, id: impl core::fmt::Display) -> Self {
        EngineError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn rejected(code: RejectionCode, entity_id: impl core::fmt::Display) -> Self {
        EngineError::Dispatch(DispatchError::Rejected {
            code,
            entity_id: entity_id.to_string(),
        })
    }

    /// Stable rejection code, if any.
    pub fn code(&self) -> Option<RejectionCode> {
        match self {
            EngineError::Dispatch(e) => e.code(),
            _ => None,
        }
    }

    pub fn is_rejection(&self, code: RejectionCode) -> bool {
        self.code() == Some(code)
    }
}
