//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use agora_types::error::{ApprovalError, ValidationError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Approval protocol errors.
    Approval(ApprovalError),
    /// Rejections at the event publish boundary.
    Event(ValidationError),
    /// Request validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        AppError::Approval(e)
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Event(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Approval(ApprovalError::UnknownApproval(id)) => (
                StatusCode::NOT_FOUND,
                "APPROVAL_NOT_FOUND",
                format!("No open approval with id '{id}'"),
            ),
            AppError::Approval(ApprovalError::AlreadyResolved(id)) => (
                StatusCode::CONFLICT,
                "APPROVAL_RESOLVED",
                format!("Approval '{id}' was already resolved"),
            ),
            AppError::Approval(ApprovalError::MalformedRequest(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Event(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
