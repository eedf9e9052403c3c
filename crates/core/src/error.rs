//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable business rejection codes surfaced to callers.
///
/// These are terminal: the engine never retries them automatically, with the
/// single exception of `StaleVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionCode {
    InsufficientCredit,
    AccountFrozen,
    AlreadyReleased,
    AlreadyCommitted,
    AlreadyConverted,
    OverpaymentRejected,
    SkipLimitExceeded,
    StaleVersion,
    BankReconciliationMismatch,
    VerificationException,
    InvalidState,
    LimitIncreaseRequiresApproval,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::InsufficientCredit => "insufficient_credit",
            RejectionCode::AccountFrozen => "account_frozen",
            RejectionCode::AlreadyReleased => "already_released",
            RejectionCode::AlreadyCommitted => "already_committed",
            RejectionCode::AlreadyConverted => "already_converted",
            RejectionCode::OverpaymentRejected => "overpayment_rejected",
            RejectionCode::SkipLimitExceeded => "skip_limit_exceeded",
            RejectionCode::StaleVersion => "stale_version",
            RejectionCode::BankReconciliationMismatch => "bank_reconciliation_mismatch",
            RejectionCode::VerificationException => "verification_exception",
            RejectionCode::InvalidState => "invalid_state",
            RejectionCode::LimitIncreaseRequiresApproval => "limit_increase_requires_approval",
        }
    }
}

impl core::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level error.
///
/// Deterministic business failures only (validation, invariants, rejections).
/// Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authorization failure at the domain boundary.
    #[error("unauthorized")]
    Unauthorized,

    /// A business rule rejected the command; carries the entity id for support lookup.
    #[error("{code} ({entity_id})")]
    Rejected {
        code: RejectionCode,
        entity_id: String,
    },
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

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn rejected(code: RejectionCode, entity_id: impl core::fmt::Display) -> Self {
        Self::Rejected {
            code,
            entity_id: entity_id.to_string(),
        }
    }

    /// Rejection code, if this error is a business rejection.
    pub fn code(&self) -> Option<RejectionCode> {
        match self {
            DomainError::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}
