//! # Error Handling
//!
//! Unified error responses for the webhook surface. Bodies are `{"status", "message"}`,
//! with `message` omitted when empty; the trace id travels in the `X-Trace-Id` header.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code, repeated in the body
    #[serde(serialize_with = "serialize_status")]
    #[schema(value_type = u16, example = 401)]
    pub status: StatusCode,
    /// Human-readable error message (omitted when empty)
    #[serde(skip_serializing_if = "str::is_empty")]
    #[schema(example = "Invalid signature")]
    pub message: Box<str>,
}

fn serialize_status<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into().into_boxed_str(),
        }
    }
}

/// True when `error` is a unique-constraint failure on either backend.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    matches!(
        error.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

/// Standard error types with predefined status codes
#[derive(Debug, Error)]
pub enum ErrorType {
    #[error("Invalid payload")]
    InvalidPayload,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Forbidden")]
    Forbidden,
    #[error("")]
    NotFound,
    #[error("")]
    InternalServerError,
}

impl ErrorType {
    /// Get the appropriate HTTP status code for this error type
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorType::InvalidPayload => StatusCode::BAD_REQUEST,
            ErrorType::InvalidSignature => StatusCode::UNAUTHORIZED,
            ErrorType::Forbidden => StatusCode::FORBIDDEN,
            ErrorType::NotFound => StatusCode::NOT_FOUND,
            ErrorType::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self)).into_response()
    }
}

// Error mappers for common sources

impl From<ErrorType> for ApiError {
    fn from(error_type: ErrorType) -> Self {
        Self::new(error_type.status_code(), error_type.to_string())
    }
}

impl From<crate::registry::RegistryError> for ApiError {
    fn from(error: crate::registry::RegistryError) -> Self {
        use crate::registry::RegistryError;

        match error {
            RegistryError::NotFound { .. } => ErrorType::NotFound.into(),
            other => {
                tracing::error!(error = %other, "Hook registry failure");
                ErrorType::InternalServerError.into()
            }
        }
    }
}

impl From<crate::orchestrator::OrchestratorError> for ApiError {
    fn from(error: crate::orchestrator::OrchestratorError) -> Self {
        tracing::error!(error = %error, "Review app orchestration failed");
        ErrorType::InternalServerError.into()
    }
}
