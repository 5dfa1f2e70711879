//! Error types for CasaPay lifecycle operations.

use crate::period::InvalidPeriod;
use crate::states::EntityKind;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for CasaPay operations.
///
/// Every rejected precondition is reported verbatim to the caller with
/// enough context (entity id, current state, amounts) to be actionable.
/// The engine performs no silent recovery.
#[derive(Error, Debug)]
pub enum CasaPayError {
    /// Entity missing or owned by a different account.
    #[error("{entity} not found: {id}")]
    NotFound { entity: EntityKind, id: String },

    /// Input that does not normalize into a calendar month.
    #[error("Invalid period: {input}")]
    InvalidPeriod { input: String },

    /// Transition not listed in the allowed-transition table.
    #[error("Invalid {entity} transition from '{from}' to '{to}' ({id})")]
    InvalidTransition {
        entity: EntityKind,
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Balance too low to fund a payment.
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    /// Unique-constraint violation not otherwise classified.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CasaPayError {
    /// Convenience constructor for ownership/lookup failures.
    pub fn not_found(entity: EntityKind, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable error code for logs and external responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            CasaPayError::NotFound { .. } => "NOT_FOUND",
            CasaPayError::InvalidPeriod { .. } => "INVALID_PERIOD",
            CasaPayError::InvalidTransition { .. } => "INVALID_STATE_TRANSITION",
            CasaPayError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CasaPayError::Conflict(_) => "CONFLICT_DUPLICATE",
            CasaPayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Check if the caller may retry the operation unchanged.
    ///
    /// Retries are the caller's responsibility; the engine runs no retry
    /// loop of its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CasaPayError::Internal(_))
    }
}

impl From<InvalidPeriod> for CasaPayError {
    fn from(err: InvalidPeriod) -> Self {
        Self::InvalidPeriod { input: err.input }
    }
}

/// Result type alias for CasaPay operations.
pub type Result<T> = std::result::Result<T, CasaPayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Period;

    #[test]
    fn test_error_codes() {
        let err = CasaPayError::not_found(EntityKind::Invoice, "abc");
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err = CasaPayError::InsufficientFunds {
            available: Decimal::from(100),
            required: Decimal::from(500),
        };
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_invalid_period_converts() {
        let err: CasaPayError = Period::parse("garbage").unwrap_err().into();
        assert_eq!(err.error_code(), "INVALID_PERIOD");
        assert!(err.to_string().contains("garbage"));
    }

    #[test]
    fn test_insufficient_funds_reports_amounts() {
        let err = CasaPayError::InsufficientFunds {
            available: Decimal::from(350_000),
            required: Decimal::from(420_000),
        };
        let msg = err.to_string();
        assert!(msg.contains("350000"));
        assert!(msg.contains("420000"));
    }
}
