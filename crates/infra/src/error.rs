//! Error returned by the ledger services and its transport-neutral category.

use thiserror::Error;

use cornucopia_core::DomainError;

use crate::store::StoreError;

/// Failure of a transfer, account or journal operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a caller (or a transport adapter) should treat a [`TransferError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed request; retrying the same input fails the same way.
    InvalidInput,
    /// Request is well-formed but the current ledger state forbids it.
    FailedPrecondition,
    NotFound,
    /// Storage or lock failure.
    Internal,
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferError::Domain(e) if e.is_input_error() => ErrorCategory::InvalidInput,
            TransferError::Domain(e) if e.is_precondition_failure() => {
                ErrorCategory::FailedPrecondition
            }
            TransferError::Domain(e) if e.is_not_found() => ErrorCategory::NotFound,
            TransferError::Domain(_) | TransferError::Store(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the same request may succeed if sent again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Store(StoreError::LockTimeout(_) | StoreError::Database(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_the_error_taxonomy() {
        let cases: Vec<(TransferError, ErrorCategory)> = vec![
            (DomainError::InvalidAmount.into(), ErrorCategory::InvalidInput),
            (DomainError::AmountTooLarge.into(), ErrorCategory::InvalidInput),
            (DomainError::SelfTransfer.into(), ErrorCategory::InvalidInput),
            (DomainError::InvalidIdempotencyKey.into(), ErrorCategory::InvalidInput),
            (DomainError::DescriptionTooLong.into(), ErrorCategory::InvalidInput),
            (DomainError::invalid_id("x").into(), ErrorCategory::InvalidInput),
            (DomainError::InsufficientBalance.into(), ErrorCategory::FailedPrecondition),
            (DomainError::BalanceOverflow.into(), ErrorCategory::FailedPrecondition),
            (DomainError::AccountNotFound.into(), ErrorCategory::NotFound),
            (DomainError::JournalEntryNotFound.into(), ErrorCategory::NotFound),
            (StoreError::LockTimeout("l".into()).into(), ErrorCategory::Internal),
            (StoreError::Database("d".into()).into(), ErrorCategory::Internal),
            (
                StoreError::DuplicateIdempotencyKey("k".into()).into(),
                ErrorCategory::Internal,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.category(), expected, "{err}");
        }
    }

    #[test]
    fn only_transient_store_failures_are_retryable() {
        assert!(TransferError::from(StoreError::LockTimeout("l".into())).is_retryable());
        assert!(TransferError::from(StoreError::Database("d".into())).is_retryable());
        assert!(!TransferError::from(StoreError::Corrupt("c".into())).is_retryable());
        assert!(!TransferError::from(DomainError::InsufficientBalance).is_retryable());
    }

    #[test]
    fn display_is_transparent() {
        let err = TransferError::from(DomainError::InsufficientBalance);
        assert_eq!(err.to_string(), "insufficient balance");
    }
}
