//! Payment confirmation endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use common::{OrderId, OrderStatus};
use serde::Serialize;
use store::OrderStore;

use crate::error::ApiError;

use super::{AppState, owner_from_headers};

#[derive(Serialize)]
pub struct PaymentConfirmedResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// POST /payments/:id/confirm — confirm payment for one of the caller's
/// orders, moving it to PAID and enqueueing fulfillment.
#[tracing::instrument(skip(state, headers))]
pub async fn confirm<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentConfirmedResponse>, ApiError> {
    let owner = owner_from_headers(&headers)?;
    let order = state.payments.confirm_payment(&owner, id).await?;

    Ok(Json(PaymentConfirmedResponse {
        order_id: order.id,
        status: order.status,
    }))
}
