//! Domain error model.

use thiserror::Error;

use crate::money::{Currency, Money};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// invariants, state-machine violations). Infrastructure concerns (storage
/// conflicts, duplicate idempotency keys) belong to the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// No wallet exists for the requested owner/id.
    #[error("wallet not found")]
    WalletNotFound,

    /// The wallet is frozen (administrative hold); mutation is blocked.
    #[error("wallet is frozen")]
    WalletFrozen,

    /// The wallet is closed; no further mutation is permitted.
    #[error("wallet is closed")]
    WalletClosed,

    /// Two amounts with different currencies met in one operation.
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        expected: Currency,
        actual: Currency,
    },

    /// Non-positive or unrepresentable amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A debit exceeded the available balance; carries the shortfall.
    #[error("insufficient balance: short by {shortfall}")]
    InsufficientBalance { shortfall: Money },

    /// Sender and receiver of a transfer are the same wallet owner.
    #[error("transfer to the same owner is not allowed")]
    SelfTransferNotAllowed,

    /// A state machine was asked for an edge it does not have.
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
