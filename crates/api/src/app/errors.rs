use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use cornucopia_infra::{ErrorCategory, TransferError};

/// Map a ledger error onto a status code and the common JSON error body.
///
/// Internal failures are logged here and reported without detail.
pub fn transfer_error_to_response(err: TransferError) -> axum::response::Response {
    match err.category() {
        ErrorCategory::InvalidInput => {
            json_error(StatusCode::BAD_REQUEST, "invalid_argument", err.to_string())
        }
        ErrorCategory::FailedPrecondition => json_error(
            StatusCode::PRECONDITION_FAILED,
            "failed_precondition",
            err.to_string(),
        ),
        ErrorCategory::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        ErrorCategory::Internal => {
            tracing::error!(error = %err, retryable = err.is_retryable(), "ledger operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(json!({
                    "error": "internal",
                    "message": "internal error",
                    "retryable": err.is_retryable(),
                })),
            )
                .into_response()
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
