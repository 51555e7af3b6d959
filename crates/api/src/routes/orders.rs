//! Order creation and read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::OrderId;
use serde::Deserialize;
use store::{OrderLine, OrderStore, OrderView};

use crate::error::ApiError;

use super::{AppState, idempotency_key_from_headers, owner_from_headers};

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLine>,
}

/// POST /orders — create an order.
///
/// A repeat of the same request carrying the same `idempotency-key` header
/// returns the original response instead of creating a second order.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>), ApiError> {
    let owner = owner_from_headers(&headers)?;
    let idempotency_key = idempotency_key_from_headers(&headers);

    let view = state
        .orders
        .create_order(owner, req.items, idempotency_key)
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /orders — list the caller's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrderView>>, ApiError> {
    let owner = owner_from_headers(&headers)?;
    let views = state.orders.list_orders(&owner).await?;
    Ok(Json(views))
}

/// GET /orders/:id — fetch one of the caller's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    let owner = owner_from_headers(&headers)?;
    let view = state
        .orders
        .order_view(&owner, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(view))
}
