//! HTTP-facing errors.
//!
//! TigerStyle: Every module error maps to exactly one status; internals never leak.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::accounts::AccountError;
use crate::backup::BackupError;
use crate::events::EventError;
use crate::objstore::ObjectError;
use crate::restore::RestoreError;
use crate::storage::StorageError;

/// Body returned for internal failures
pub const MSG_INTERNAL: &str = "An internal error occurred.";

/// One invalid form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Message of the first error, or an empty string.
#[must_use]
pub fn first_message(errors: &[FieldError]) -> &str {
    errors.first().map_or("", |e| e.message.as_str())
}

/// Error returned by every handler.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{}", first_message(.0))]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A dependency such as the object store is not configured
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(fields) => json!({
                "error": first_message(fields),
                "field": fields.first().map(|f| f.field.as_str()),
                "fields": fields,
            }),
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                json!({ "error": MSG_INTERNAL })
            }
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Conversions
// =============================================================================

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ObjectError> for AppError {
    fn from(err: ObjectError) -> Self {
        match err {
            ObjectError::MissingCredentials => Self::Unavailable(err.to_string()),
            ObjectError::NotFound(_) => Self::NotFound(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Invalid(fields) => Self::Validation(fields),
            AccountError::AlreadyRegistered(msg) => Self::Conflict(msg),
            AccountError::Auth(msg) => Self::Unauthorized(msg),
            AccountError::Unauthenticated => Self::Unauthorized(err.to_string()),
            AccountError::Forbidden(msg) => Self::Forbidden(msg),
            AccountError::NotFound(msg) => Self::NotFound(msg),
            AccountError::InvalidResetLink => Self::BadRequest(err.to_string()),
            AccountError::Hash(msg) => Self::Internal(msg),
            AccountError::Token(e) => Self::Internal(e.to_string()),
            AccountError::Storage(e) => e.into(),
        }
    }
}

impl From<EventError> for AppError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Invalid { field, message } => {
                Self::Validation(vec![FieldError::new(&field, message)])
            }
            EventError::Duplicate => Self::Conflict(err.to_string()),
            EventError::NotFound(msg) => Self::NotFound(msg),
            EventError::Forbidden(msg) => Self::Forbidden(msg),
            EventError::Conflict(msg) => Self::Conflict(msg),
            EventError::Storage(e) => e.into(),
        }
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::NotFound(msg) => Self::NotFound(msg),
            BackupError::Object(e) => e.into(),
            BackupError::Storage(e) => e.into(),
            BackupError::Io(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<RestoreError> for AppError {
    fn from(err: RestoreError) -> Self {
        match err {
            RestoreError::NotFound(msg) => Self::NotFound(msg),
            RestoreError::Forbidden(msg) => Self::Forbidden(msg),
            RestoreError::NotRestorable(msg) => Self::BadRequest(msg),
            RestoreError::AlreadyRunning(_) => Self::Conflict(err.to_string()),
            RestoreError::Object(e) => e.into(),
            RestoreError::Storage(e) => e.into(),
            RestoreError::InvalidScript(msg) | RestoreError::Database(msg) => Self::Internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_first_message() {
        assert_eq!(first_message(&[]), "");
        let errors = vec![
            FieldError::new("email", "Please enter your email address."),
            FieldError::new("password", "Please enter your password."),
        ];
        assert_eq!(first_message(&errors), "Please enter your email address.");
    }

    #[tokio::test]
    async fn test_validation_response_lists_fields() {
        let err = AppError::Validation(vec![
            FieldError::new("first_name", "This field is required."),
            FieldError::new("last_name", "This field is required."),
        ]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "This field is required.");
        assert_eq!(body["field"], "first_name");
        assert_eq!(body["fields"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let err: AppError = StorageError::read("relation \"User\" does not exist").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], MSG_INTERNAL);
    }

    #[test]
    fn test_module_error_statuses() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (EventError::Duplicate.into(), StatusCode::CONFLICT),
            (AccountError::Unauthenticated.into(), StatusCode::UNAUTHORIZED),
            (AccountError::InvalidResetLink.into(), StatusCode::BAD_REQUEST),
            (ObjectError::MissingCredentials.into(), StatusCode::SERVICE_UNAVAILABLE),
            (StorageError::conflict("dup").into(), StatusCode::CONFLICT),
            (
                EventError::Forbidden("no".to_string()).into(),
                StatusCode::FORBIDDEN,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err:?}");
        }
    }
}
