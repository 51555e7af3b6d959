//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use axum::http::HeaderMap;
use checkout::{OrderService, PaymentService};
use common::OwnerId;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub orders: OrderService<S>,
    pub payments: PaymentService<S>,
}

/// Header carrying the opaque owner identity, injected by the auth layer.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Extracts the owner identity from the request headers.
pub(crate) fn owner_from_headers(headers: &HeaderMap) -> Result<OwnerId, ApiError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(OwnerId::new)
        .ok_or_else(|| ApiError::BadRequest(format!("Missing {OWNER_HEADER} header")))
}

/// Extracts the optional idempotency key from the request headers.
pub(crate) fn idempotency_key_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
