//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use store::{InMemoryStore, NewProduct, OrderStore, ProductRecord};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, InMemoryStore) {
    let store = InMemoryStore::new();
    let state = api::create_state(store.clone());
    let app = api::create_app(state, get_metrics_handle());
    (app, store)
}

async fn seed_product(store: &InMemoryStore, price: i64, stock: i32) -> ProductRecord {
    store
        .create_product(NewProduct {
            sku: format!("SKU-{price}"),
            name: "Widget".to_string(),
            price: Money::from_cents(price),
            stock_qty: stock,
        })
        .await
        .unwrap()
}

fn create_order_request(
    owner: Option<&str>,
    idempotency_key: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json");
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    if let Some(key) = idempotency_key {
        builder = builder.header("idempotency-key", key);
    }
    builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_order() {
    let (app, store) = setup();
    let product = seed_product(&store, 2500, 10).await;

    let response = app
        .oneshot(create_order_request(
            Some("owner-1"),
            None,
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 2 }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "PENDING_PAYMENT");
    assert_eq!(json["total_cents"], 5000);
    assert_eq!(json["items"][0]["quantity"], 2);
    assert_eq!(json["items"][0]["unit_price_cents"], 2500);

    assert_eq!(store.product(product.id).await.unwrap().unwrap().stock_qty, 8);
}

#[tokio::test]
async fn test_create_order_requires_owner_header() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 5).await;

    let response = app
        .oneshot(create_order_request(
            None,
            None,
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 1 }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_order_rejects_empty_items() {
    let (app, _) = setup();

    let response = app
        .oneshot(create_order_request(
            Some("owner-1"),
            None,
            serde_json::json!({ "items": [] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Order has no items");
}

#[tokio::test]
async fn test_insufficient_stock_names_the_product() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 3).await;

    let response = app
        .oneshot(create_order_request(
            Some("owner-1"),
            None,
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 5 }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("SKU-1000"), "got: {message}");
    assert!(message.contains("requested 5"), "got: {message}");
}

#[tokio::test]
async fn test_idempotent_create_returns_identical_response() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 5).await;
    let body = serde_json::json!({
        "items": [{ "product_id": product.id, "quantity": 2 }]
    });

    let first = app
        .clone()
        .oneshot(create_order_request(
            Some("owner-1"),
            Some("idem-123"),
            body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_json = body_json(first).await;

    let second = app
        .oneshot(create_order_request(
            Some("owner-1"),
            Some("idem-123"),
            body,
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    let second_json = body_json(second).await;

    assert_eq!(first_json, second_json);
    assert_eq!(store.order_count().await, 1);
    assert_eq!(store.product(product.id).await.unwrap().unwrap().stock_qty, 3);
}

#[tokio::test]
async fn test_idempotency_key_reuse_conflicts() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 5).await;

    let first = app
        .clone()
        .oneshot(create_order_request(
            Some("owner-1"),
            Some("idem-123"),
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 1 }]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(create_order_request(
            Some("owner-1"),
            Some("idem-123"),
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 3 }]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(store.order_count().await, 1);
}

#[tokio::test]
async fn test_get_order_is_owner_scoped() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 5).await;

    let created = app
        .clone()
        .oneshot(create_order_request(
            Some("owner-1"),
            None,
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 1 }]
            }),
        ))
        .await
        .unwrap();
    let order_id = body_json(created).await["id"].as_str().unwrap().to_string();

    let mine = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{order_id}"))
                .header("x-owner-id", "owner-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(mine.status(), StatusCode::OK);

    let theirs = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{order_id}"))
                .header("x-owner-id", "owner-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(theirs.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders() {
    let (app, store) = setup();
    let product = seed_product(&store, 1000, 10).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(create_order_request(
                Some("owner-1"),
                None,
                serde_json::json!({
                    "items": [{ "product_id": product.id, "quantity": 1 }]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/orders")
                .header("x-owner-id", "owner-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_confirm_payment_once() {
    let (app, store) = setup();
    let product = seed_product(&store, 2500, 10).await;

    let created = app
        .clone()
        .oneshot(create_order_request(
            Some("owner-1"),
            None,
            serde_json::json!({
                "items": [{ "product_id": product.id, "quantity": 1 }]
            }),
        ))
        .await
        .unwrap();
    let order_id = body_json(created).await["id"].as_str().unwrap().to_string();

    let confirm = |app: axum::Router| {
        let uri = format!("/payments/{order_id}/confirm");
        async move {
            app.oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("x-owner-id", "owner-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
        }
    };

    let first = confirm(app.clone()).await;
    assert_eq!(first.status(), StatusCode::OK);
    let json = body_json(first).await;
    assert_eq!(json["status"], "PAID");
    assert_eq!(store.outbox_count().await, 1);

    // Confirming again is an invalid state transition, not a new event.
    let second = confirm(app).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.outbox_count().await, 1);
}
