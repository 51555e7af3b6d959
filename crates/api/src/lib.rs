//! HTTP API server for the order-processing system.
//!
//! Translates wire requests into [`checkout`] service calls and maps the
//! error taxonomy onto status codes: invalid input → 400, idempotency-key
//! conflict → 409, not found → 404, invalid state transition → 400.
//!
//! The owner identity arrives as the opaque `x-owner-id` header, injected
//! by the auth collaborator in front of this service; it is never
//! validated or decoded here.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout::{OrderService, PaymentService};
use metrics_exporter_prometheus::PrometheusHandle;
use store::OrderStore;
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/payments/{id}/confirm",
            post(routes::payments::confirm::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

/// Creates the shared application state over the given store.
pub fn create_state<S: OrderStore + Clone>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        orders: OrderService::new(store.clone()),
        payments: PaymentService::new(store),
    })
}
