//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Idempotency key reused with a different payload.
    Conflict(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::UnknownProduct(_) | StoreError::InsufficientStock { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            StoreError::IdempotencyConflict { .. } => ApiError::Conflict(err.to_string()),
            StoreError::OrderNotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::InvalidTransition { .. } => ApiError::BadRequest(err.to_string()),
            StoreError::Database(_) | StoreError::Migration(_) | StoreError::Serialization(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::NoItems
            | CheckoutError::DuplicateProduct(_)
            | CheckoutError::InvalidQuantity { .. } => ApiError::BadRequest(err.to_string()),
            CheckoutError::Store(store_err) => store_err.into(),
        }
    }
}
