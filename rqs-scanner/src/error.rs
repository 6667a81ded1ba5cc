//! HTTP API error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rqs_common::receipts::{FieldErrorKind, ParseError};
use serde_json::json;
use thiserror::Error;

/// API error type
///
/// Rendered as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Submitted text is not an acceptable reference
    #[error("invalid reference: {error}")]
    InvalidRef { error: ParseError, text: String },

    /// Reference with the same unique key is already stored
    #[error("receipt already exists: {0}")]
    AlreadyExists(String),

    #[error("wrong sort mode: {0}")]
    WrongSortMode(String),

    #[error("wrong number format: {0}")]
    WrongNumberFormat(String),

    #[error("wrong time format: {0}")]
    WrongTimeFormat(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// rqs-common error
    #[error("Common error: {0}")]
    Common(rqs_common::Error),
}

impl From<rqs_common::Error> for ApiError {
    fn from(e: rqs_common::Error) -> Self {
        match e {
            rqs_common::Error::Duplicate(key) => ApiError::AlreadyExists(key),
            other => ApiError::Common(other),
        }
    }
}

impl ApiError {
    pub fn invalid_ref(error: ParseError, text: &str) -> Self {
        ApiError::InvalidRef {
            error,
            text: text.to_string(),
        }
    }

    /// Machine-readable code and human-readable message
    pub fn code_and_message(&self) -> (String, String) {
        match self {
            ApiError::InvalidRef {
                error: ParseError::Field(field),
                ..
            } => {
                let prefix = match field.kind {
                    FieldErrorKind::Missing => "MISSING_VALUE_",
                    FieldErrorKind::Malformed => "WRONG_VALUE_",
                };
                (
                    format!("{}{}", prefix, field.name.to_uppercase()),
                    field.value.clone(),
                )
            }
            ApiError::InvalidRef {
                error: ParseError::UnrecognizedFormat,
                text,
            } => ("WRONG_REF".to_string(), text.clone()),
            ApiError::AlreadyExists(key) => ("ALREADY_EXISTS".to_string(), key.clone()),
            ApiError::WrongSortMode(v) => ("WRONG_SORT_MODE".to_string(), v.clone()),
            ApiError::WrongNumberFormat(v) => ("WRONG_NUMBER_FORMAT".to_string(), v.clone()),
            ApiError::WrongTimeFormat(v) => ("WRONG_TIME_FORMAT".to_string(), v.clone()),
            ApiError::Internal(msg) => ("INTERNAL_ERROR".to_string(), msg.clone()),
            ApiError::Common(err) => ("COMMON_ERROR".to_string(), err.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let (code, message) = self.code_and_message();

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
