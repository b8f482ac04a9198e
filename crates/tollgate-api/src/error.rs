//! Error-to-status mapping at the RPC boundary.
//!
//! The single place where [`BillingError`] kinds become HTTP statuses.
//! Substrate detail never leaves the process: internal errors are logged and
//! coerced to a generic message before serialization.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use tollgate_types::BillingError;

/// Wire shape of an error reply.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine code mirroring gRPC status names.
    pub code: &'static str,
    pub message: String,
}

/// Newtype that lets handlers return `Result<Json<T>, ApiError>`.
pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let (status, message) = match &self.0 {
            BillingError::Auth(_) => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            BillingError::Validation { .. } => (StatusCode::BAD_REQUEST, self.0.to_string()),
            BillingError::InsufficientBalance => {
                (StatusCode::PRECONDITION_FAILED, "insufficient_balance".into())
            }
            BillingError::ReservationNotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            BillingError::ReservationConflict(_) => {
                (StatusCode::PRECONDITION_FAILED, self.0.to_string())
            }
            BillingError::Pricing(_) => (StatusCode::PRECONDITION_FAILED, self.0.to_string()),
            BillingError::External(detail) => {
                error!(detail, "internal error at rpc boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
            other => {
                error!(detail = %other, "unhandled error variant at rpc boundary");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(ErrorBody { error: ErrorDetail { code, message } })).into_response()
    }
}
