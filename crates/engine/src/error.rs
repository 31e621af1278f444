//! The module contains the errors the engine can return.
//!
//! Every validation failure of the ledger has its own variant so callers can
//! translate it without parsing messages. [`EngineError::kind`] returns the
//! stable, serializable [`ErrorKind`] for presentation layers.
//!
//! Only [`Conflict`] is retried automatically (see
//! [`EngineBuilder::max_conflict_retries`]).
//!
//!  [`Conflict`]: EngineError::Conflict
//!  [`EngineBuilder::max_conflict_retries`]: crate::EngineBuilder::max_conflict_retries
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),
    #[error("Insufficient source balance: {0}")]
    InsufficientSourceBalance(String),
    #[error("Target over-allocation: {0}")]
    TargetOverAllocation(String),
    #[error("Source closed: {0}")]
    SourceClosed(String),
    #[error("Target closed: {0}")]
    TargetClosed(String),
    #[error("Allocation already reversed: {0}")]
    AlreadyReversed(String),
    #[error("Excessive reversal: {0}")]
    ExcessiveReversal(String),
    #[error("Source has active allocations: {0}")]
    SourceHasActiveAllocations(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid id: {0}")]
    InvalidId(String),
    #[error("Idempotency key \"{0}\" already used for a different request")]
    IdempotencyKeyReused(String),
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),
    #[error("Batch rejected at item {index}: {reason}")]
    BatchRejected {
        index: usize,
        reason: Box<EngineError>,
    },
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// Stable classification of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    CurrencyMismatch,
    InsufficientSourceBalance,
    TargetOverAllocation,
    SourceClosed,
    TargetClosed,
    AlreadyReversed,
    ExcessiveReversal,
    SourceHasActiveAllocations,
    Conflict,
    InvalidAmount,
    InvalidId,
    IdempotencyKeyReused,
    RateUnavailable,
    BatchRejected,
    Database,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CurrencyMismatch(_) => ErrorKind::CurrencyMismatch,
            Self::InsufficientSourceBalance(_) => ErrorKind::InsufficientSourceBalance,
            Self::TargetOverAllocation(_) => ErrorKind::TargetOverAllocation,
            Self::SourceClosed(_) => ErrorKind::SourceClosed,
            Self::TargetClosed(_) => ErrorKind::TargetClosed,
            Self::AlreadyReversed(_) => ErrorKind::AlreadyReversed,
            Self::ExcessiveReversal(_) => ErrorKind::ExcessiveReversal,
            Self::SourceHasActiveAllocations(_) => ErrorKind::SourceHasActiveAllocations,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InvalidId(_) => ErrorKind::InvalidId,
            Self::IdempotencyKeyReused(_) => ErrorKind::IdempotencyKeyReused,
            Self::RateUnavailable(_) => ErrorKind::RateUnavailable,
            Self::BatchRejected { .. } => ErrorKind::BatchRejected,
            Self::Database(_) => ErrorKind::Database,
        }
    }

    /// For a rejected batch, the kind of the item that failed.
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            Self::BatchRejected { reason, .. } => reason.root_kind(),
            other => other.kind(),
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::CurrencyMismatch(a), Self::CurrencyMismatch(b)) => a == b,
            (Self::InsufficientSourceBalance(a), Self::InsufficientSourceBalance(b)) => a == b,
            (Self::TargetOverAllocation(a), Self::TargetOverAllocation(b)) => a == b,
            (Self::SourceClosed(a), Self::SourceClosed(b)) => a == b,
            (Self::TargetClosed(a), Self::TargetClosed(b)) => a == b,
            (Self::AlreadyReversed(a), Self::AlreadyReversed(b)) => a == b,
            (Self::ExcessiveReversal(a), Self::ExcessiveReversal(b)) => a == b,
            (Self::SourceHasActiveAllocations(a), Self::SourceHasActiveAllocations(b)) => a == b,
            (Self::Conflict(a), Self::Conflict(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidId(a), Self::InvalidId(b)) => a == b,
            (Self::IdempotencyKeyReused(a), Self::IdempotencyKeyReused(b)) => a == b,
            (Self::RateUnavailable(a), Self::RateUnavailable(b)) => a == b,
            (
                Self::BatchRejected {
                    index: ia,
                    reason: ra,
                },
                Self::BatchRejected {
                    index: ib,
                    reason: rb,
                },
            ) => ia == ib && ra == rb,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
