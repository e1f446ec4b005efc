//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, missing records). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Amount was zero or negative.
    #[error("amount must be positive")]
    InvalidAmount,

    /// Transfer amount is above the fixed per-transfer ceiling.
    #[error("amount exceeds maximum allowed value")]
    AmountTooLarge,

    /// Source and destination account are the same.
    #[error("cannot transfer to self")]
    SelfTransfer,

    /// Idempotency key was empty or whitespace only.
    #[error("idempotency key must not be empty")]
    InvalidIdempotencyKey,

    /// Description is longer than the allowed maximum.
    #[error("description is too long")]
    DescriptionTooLong,

    /// Withdrawal would take a non-overdraft account below zero.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// Balance arithmetic would leave the `i64` range.
    #[error("balance would overflow")]
    BalanceOverflow,

    /// A referenced account does not exist.
    #[error("account not found")]
    AccountNotFound,

    /// A referenced journal entry does not exist.
    #[error("journal entry not found")]
    JournalEntryNotFound,

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Caller input errors: never retried, surfaced as a client fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DomainError::InvalidAmount
                | DomainError::AmountTooLarge
                | DomainError::SelfTransfer
                | DomainError::InvalidIdempotencyKey
                | DomainError::DescriptionTooLong
                | DomainError::InvalidId(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::AccountNotFound | DomainError::JournalEntryNotFound
        )
    }

    /// Business-rule violations that depend on current ledger state.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self,
            DomainError::InsufficientBalance | DomainError::BalanceOverflow
        )
    }
}
