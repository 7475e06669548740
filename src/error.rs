// src/error.rs

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Every operation of the service reports failures through one of these kinds,
/// and the HTTP boundary maps each kind to a status code.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error (storage failures and the like)
    InternalServerError(String),

    // 500, but an invariant breach was detected. Never repaired silently.
    InternalConsistency(String),

    // 400 Bad Request (malformed payload)
    BadRequest(String),

    // 401 Unauthorized (missing, invalid, expired or revoked credential)
    Unauthorized(String),

    // 403 Forbidden (authenticated, wrong role)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 400, malformed relative to catalog data
    InvalidDefinition(String),
    UnknownQuestion(String),
    InvalidOption(String),
    TooManySelections(String),

    // 409 Conflict, lifecycle violations
    ExamNotActive(String),
    AlreadyActive(String),
    InvalidTransition(String),

    // 423 Locked, mutation against a submitted attempt
    AttemptLocked(String),
}

impl AppError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InternalServerError(_) => "internal",
            AppError::InternalConsistency(_) => "internal_consistency",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidDefinition(_) => "invalid_definition",
            AppError::UnknownQuestion(_) => "unknown_question",
            AppError::InvalidOption(_) => "invalid_option",
            AppError::TooManySelections(_) => "too_many_selections",
            AppError::ExamNotActive(_) => "exam_not_active",
            AppError::AlreadyActive(_) => "already_active",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::AttemptLocked(_) => "attempt_locked",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) | AppError::InternalConsistency(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_)
            | AppError::InvalidDefinition(_)
            | AppError::UnknownQuestion(_)
            | AppError::InvalidOption(_)
            | AppError::TooManySelections(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExamNotActive(_)
            | AppError::AlreadyActive(_)
            | AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::AttemptLocked(_) => StatusCode::LOCKED,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
/// Server-side failures are logged and replaced by a generic message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let error_message = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::InternalConsistency(msg) => {
                tracing::error!("Internal consistency violation: {}", msg);
                "Internal consistency violation".to_string()
            }
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidDefinition(msg)
            | AppError::UnknownQuestion(msg)
            | AppError::InvalidOption(msg)
            | AppError::TooManySelections(msg)
            | AppError::ExamNotActive(msg)
            | AppError::AlreadyActive(msg)
            | AppError::InvalidTransition(msg)
            | AppError::AttemptLocked(msg) => msg,
        };
        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

/// Malformed or mistyped request bodies surface as `bad_request`.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}
