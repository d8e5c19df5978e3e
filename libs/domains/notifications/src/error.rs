use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Store failures
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Unique index on `externalId` rejected the insert
    #[error("Notification with external id '{0}' already exists")]
    Duplicate(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<mongodb::error::Error> for RepositoryError {
    fn from(err: mongodb::error::Error) -> Self {
        RepositoryError::Database(err.to_string())
    }
}

/// Errors of the HTTP read surface
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification not found: {0}")]
    NotFound(String),

    #[error("Invalid notification id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type NotificationResult<T> = Result<T, NotificationError>;

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        let status = match &self {
            NotificationError::NotFound(_) => StatusCode::NOT_FOUND,
            NotificationError::InvalidId(_) => StatusCode::BAD_REQUEST,
            NotificationError::Repository(RepositoryError::Timeout(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            NotificationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Notification request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
