//! Error taxonomy shared by the tracker, accounts and HTTP layer

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid UTC offset: {0}")]
    InvalidOffset(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("User '{0}' already exists")]
    AlreadyExists(String),

    #[error("Wrong username or password")]
    WrongCredentials,

    #[error("Storage unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::StoreUnavailable(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(id) => AppError::AlreadyExists(id),
            StorageError::Other(e) => AppError::StoreUnavailable(e),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_)
            | AppError::InvalidOffset(_)
            | AppError::AlreadyExists(_)
            | AppError::WrongCredentials => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::StoreUnavailable(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::InvalidInput("Missing Input".into()), StatusCode::BAD_REQUEST),
            (AppError::InvalidOffset("x".into()), StatusCode::BAD_REQUEST),
            (AppError::AlreadyExists("alice".into()), StatusCode::BAD_REQUEST),
            (AppError::WrongCredentials, StatusCode::BAD_REQUEST),
            (AppError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (AppError::StoreUnavailable(anyhow!("disk gone")), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Internal("join".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_storage_conflict_maps_to_already_exists() {
        let err: AppError = StorageError::Conflict("alice".into()).into();
        assert!(matches!(err, AppError::AlreadyExists(ref id) if id == "alice"));
        assert_eq!(err.to_string(), "User 'alice' already exists");
    }
}
