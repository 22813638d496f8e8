//! API error type and HTTP status mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cirrus_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid account identity")]
    Unauthorized,

    #[error("insufficient privileges")]
    Forbidden,

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(e) => match e {
                StorageError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                StorageError::BucketNotEmpty { .. } | StorageError::BucketAlreadyExists(_) => {
                    StatusCode::CONFLICT
                }
                StorageError::BucketNotFound
                | StorageError::AccountNotFound
                | StorageError::AccessKeyNotFound => StatusCode::NOT_FOUND,
                StorageError::UnknownPlan(_) | StorageError::InvalidBucketName { .. } => {
                    StatusCode::BAD_REQUEST
                }
                StorageError::BucketSuspended => StatusCode::FORBIDDEN,
                StorageError::ExternalStore(_) => StatusCode::BAD_GATEWAY,
                StorageError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details stay in the logs, not the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
