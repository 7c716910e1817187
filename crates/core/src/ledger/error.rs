//! Ledger error types.
//!
//! Every failure the engine reports falls into one of five kinds. Store and
//! timeout failures are kept as separate variants for logging but share the
//! `Internal` kind.

use std::time::Duration;

use pointbook_shared::AppError;
use thiserror::Error;

use super::store::StoreError;

/// Failure categories exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; retrying unchanged will fail again.
    InvalidArgument,
    /// Idempotency key already used.
    AlreadyExists,
    /// Debit exceeds the available credit.
    InsufficientFunds,
    /// Referenced entity does not exist.
    NotFound,
    /// Store or infrastructure fault; the operation was rolled back.
    Internal,
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Caller Errors ==========
    /// Input failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An entry with this reference id already exists in the organization.
    #[error("Reference id {reference_id} already exists in organization {organization_id}")]
    AlreadyExists {
        /// Organization scope of the key.
        organization_id: String,
        /// The duplicated reference id.
        reference_id: String,
    },

    /// Not enough unconsumed credit to cover a debit.
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested debit amount.
        requested: i64,
        /// Sum of remaining credit across open pools.
        available: i64,
    },

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    // ========== Internal Errors ==========
    /// The store failed; the transaction was rolled back.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Lock wait or staged work exceeded the operation deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Internal consistency failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the failure category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(StoreError::UniqueViolation(_)) => ErrorKind::AlreadyExists,
            Self::Store(_) | Self::Timeout(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::AlreadyExists { .. } | Self::Store(StoreError::UniqueViolation(_)) => {
                "ALREADY_EXISTS"
            }
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Timeout(_) => "TIMEOUT",
            Self::Store(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Timeout(_) => 504,
            _ => match self.kind() {
                ErrorKind::InvalidArgument => 400,
                ErrorKind::NotFound => 404,
                ErrorKind::AlreadyExists => 409,
                ErrorKind::InsufficientFunds => 422,
                ErrorKind::Internal => 500,
            },
        }
    }

    /// Returns true if retrying the whole operation may succeed.
    ///
    /// Operations are atomic, so internal failures leave nothing behind.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidArgument(_) => Self::Validation(message),
            LedgerError::NotFound(_) => Self::NotFound(message),
            LedgerError::InsufficientFunds { .. } => Self::BusinessRule(message),
            LedgerError::AlreadyExists { .. } | LedgerError::Store(StoreError::UniqueViolation(_)) => {
                Self::Conflict(message)
            }
            LedgerError::Timeout(_) => Self::Timeout(message),
            LedgerError::Store(_) => Self::Database(message),
            LedgerError::Internal(_) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn already_exists() -> LedgerError {
        LedgerError::AlreadyExists {
            organization_id: "org".into(),
            reference_id: "r1".into(),
        }
    }

    #[rstest]
    #[case(LedgerError::InvalidArgument("amount".into()), "INVALID_ARGUMENT", 400)]
    #[case(already_exists(), "ALREADY_EXISTS", 409)]
    #[case(LedgerError::InsufficientFunds { requested: 10, available: 5 }, "INSUFFICIENT_FUNDS", 422)]
    #[case(LedgerError::NotFound("entry".into()), "NOT_FOUND", 404)]
    #[case(LedgerError::Store(StoreError::Backend("down".into())), "INTERNAL", 500)]
    #[case(LedgerError::Store(StoreError::UniqueViolation("uq".into())), "ALREADY_EXISTS", 409)]
    #[case(LedgerError::Timeout(Duration::from_millis(10)), "TIMEOUT", 504)]
    #[case(LedgerError::Internal("balance missing".into()), "INTERNAL", 500)]
    fn test_codes_and_statuses(#[case] err: LedgerError, #[case] code: &str, #[case] status: u16) {
        assert_eq!(err.error_code(), code);
        assert_eq!(err.http_status_code(), status);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LedgerError::Store(StoreError::Backend("reset".into())).is_retryable());
        assert!(!already_exists().is_retryable());
        assert!(!LedgerError::InsufficientFunds { requested: 2, available: 1 }.is_retryable());
        assert!(!LedgerError::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::InsufficientFunds {
            requested: 700,
            available: 500,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: requested 700, available 500"
        );
        assert_eq!(
            already_exists().to_string(),
            "Reference id r1 already exists in organization org"
        );
    }

    #[test]
    fn test_into_app_error() {
        let app: AppError = LedgerError::InsufficientFunds {
            requested: 2,
            available: 1,
        }
        .into();
        assert_eq!(app.status_code(), 422);

        let app: AppError = LedgerError::Store(StoreError::Backend("gone".into())).into();
        assert_eq!(app.status_code(), 500);
        assert!(!app.is_client_visible());
    }
}
