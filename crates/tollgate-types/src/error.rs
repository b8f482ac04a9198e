//! Error taxonomy for the billing core.
//!
//! Every operation returns [`Result<T>`] with [`BillingError`] as the error
//! type. The RPC adapter maps each variant to a status code exactly once via
//! [`BillingError::code`]; nothing in the core recovers from these errors.

use thiserror::Error;

/// Errors surfaced by billing operations.
///
/// Variants are grouped into client errors (auth, validation, balance,
/// reservation, pricing -- returned unretried) and substrate errors
/// (retryable from the caller's side; the core does not retry internally).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BillingError {
    // ── Client errors ────────────────────────────────────────────────

    /// The bearer token or admin key is missing, expired, or invalid.
    #[error("unauthenticated: {0}")]
    Auth(String),

    /// A request field failed validation.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A debit would drive the balance below zero.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// The reservation does not exist (never created, or TTL-expired).
    #[error("reservation not found: {0}")]
    ReservationNotFound(String),

    /// The reservation exists but cannot transition (already committed,
    /// or a create collided with an existing id).
    #[error("reservation conflict: {0}")]
    ReservationConflict(String),

    /// No price is configured for the model/endpoint, or a pricing feed
    /// returned invalid data.
    #[error("pricing error: {0}")]
    Pricing(String),

    // ── Substrate errors ─────────────────────────────────────────────

    /// The ledger substrate or an external feed failed.
    #[error("external service error: {0}")]
    External(String),
}

impl BillingError {
    /// Machine code for the RPC boundary, mirroring gRPC status names.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Auth(_) => "UNAUTHENTICATED",
            BillingError::Validation { .. } => "INVALID_ARGUMENT",
            BillingError::InsufficientBalance => "FAILED_PRECONDITION",
            BillingError::ReservationNotFound(_) => "NOT_FOUND",
            BillingError::ReservationConflict(_) => "FAILED_PRECONDITION",
            BillingError::Pricing(_) => "FAILED_PRECONDITION",
            BillingError::External(_) => "INTERNAL",
        }
    }

    /// Whether the caller may retry the operation verbatim.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::External(_))
    }

    /// Shorthand for a validation failure.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        BillingError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = BillingError::Auth("token expired".into());
        assert_eq!(err.to_string(), "unauthenticated: token expired");

        let err = BillingError::invalid("user_id", "too short");
        assert_eq!(err.to_string(), "invalid user_id: too short");

        let err = BillingError::InsufficientBalance;
        assert_eq!(err.to_string(), "insufficient balance");

        let err = BillingError::ReservationNotFound("res:u1:abc:1".into());
        assert_eq!(err.to_string(), "reservation not found: res:u1:abc:1");

        let err = BillingError::Pricing("unknown model or endpoint".into());
        assert_eq!(err.to_string(), "pricing error: unknown model or endpoint");
    }

    #[test]
    fn status_codes() {
        assert_eq!(BillingError::Auth("x".into()).code(), "UNAUTHENTICATED");
        assert_eq!(
            BillingError::invalid("amount", "out of range").code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(BillingError::InsufficientBalance.code(), "FAILED_PRECONDITION");
        assert_eq!(
            BillingError::ReservationNotFound("r".into()).code(),
            "NOT_FOUND"
        );
        assert_eq!(
            BillingError::ReservationConflict("already committed".into()).code(),
            "FAILED_PRECONDITION"
        );
        assert_eq!(BillingError::Pricing("x".into()).code(), "FAILED_PRECONDITION");
        assert_eq!(BillingError::External("redis down".into()).code(), "INTERNAL");
    }

    #[test]
    fn only_external_is_retryable() {
        assert!(BillingError::External("timeout".into()).is_retryable());
        assert!(!BillingError::InsufficientBalance.is_retryable());
        assert!(!BillingError::Auth("x".into()).is_retryable());
    }
}
