//! Order creation service.

use std::collections::HashSet;

use common::{OrderId, OwnerId};
use store::{IdempotencyInput, OrderDraft, OrderLine, OrderStore, OrderView};

use crate::error::{CheckoutError, Result};
use crate::fingerprint::request_fingerprint;

/// Service for creating and reading orders.
///
/// Validation runs up front; everything with side effects happens inside
/// a single [`OrderStore::place_order`] unit, so a failed request commits
/// nothing. Supplying an idempotency key makes the request safe to retry:
/// a repeat with the same key and payload returns the stored response
/// verbatim, with no new order and no stock change.
pub struct OrderService<S> {
    store: S,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates an order for `owner` from the requested items.
    #[tracing::instrument(skip(self, items), fields(owner = %owner, item_count = items.len()))]
    pub async fn create_order(
        &self,
        owner: OwnerId,
        items: Vec<OrderLine>,
        idempotency_key: Option<String>,
    ) -> Result<OrderView> {
        validate_items(&items)?;

        let idempotency = idempotency_key.map(|key| IdempotencyInput {
            fingerprint: request_fingerprint(&items),
            key,
        });

        let view = self
            .store
            .place_order(OrderDraft {
                owner_id: owner,
                lines: items,
                idempotency,
            })
            .await?;

        tracing::info!(order_id = %view.id, total_cents = view.total_cents.cents(), "order placed");
        Ok(view)
    }

    /// Fetches one of the owner's orders with its items.
    pub async fn order_view(&self, owner: &OwnerId, id: OrderId) -> Result<Option<OrderView>> {
        let Some(order) = self.store.order_for_owner(owner, id).await? else {
            return Ok(None);
        };
        let items = self.store.order_items(order.id).await?;
        Ok(Some(OrderView::from_records(&order, &items)))
    }

    /// Lists the owner's orders with their items, oldest first.
    pub async fn list_orders(&self, owner: &OwnerId) -> Result<Vec<OrderView>> {
        let orders = self.store.orders_for_owner(owner).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            let items = self.store.order_items(order.id).await?;
            views.push(OrderView::from_records(&order, &items));
        }
        Ok(views)
    }
}

fn validate_items(items: &[OrderLine]) -> Result<()> {
    if items.is_empty() {
        return Err(CheckoutError::NoItems);
    }

    let mut seen = HashSet::new();
    for line in items {
        if line.quantity <= 0 {
            return Err(CheckoutError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }
        if !seen.insert(line.product_id) {
            return Err(CheckoutError::DuplicateProduct(line.product_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Money, OrderStatus, ProductId};
    use store::{InMemoryStore, NewProduct, ProductRecord, StoreError};

    async fn seed_product(store: &InMemoryStore, price: i64, stock: i32) -> ProductRecord {
        store
            .create_product(NewProduct {
                sku: format!("SKU-{price}"),
                name: "Ticket".to_string(),
                price: Money::from_cents(price),
                stock_qty: stock,
            })
            .await
            .unwrap()
    }

    fn line(product: &ProductRecord, quantity: i32) -> OrderLine {
        OrderLine {
            product_id: product.id,
            quantity,
        }
    }

    #[tokio::test]
    async fn create_order_happy_path() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store);

        let view = service
            .create_order(OwnerId::new("owner-1"), vec![line(&product, 2)], None)
            .await
            .unwrap();

        assert_eq!(view.status, OrderStatus::PendingPayment);
        assert_eq!(view.total_cents.cents(), 2000);
    }

    #[tokio::test]
    async fn rejects_empty_item_list() {
        let service = OrderService::new(InMemoryStore::new());
        let result = service
            .create_order(OwnerId::new("owner-1"), vec![], None)
            .await;
        assert!(matches!(result, Err(CheckoutError::NoItems)));
    }

    #[tokio::test]
    async fn rejects_non_positive_quantity() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store);

        let result = service
            .create_order(OwnerId::new("owner-1"), vec![line(&product, 0)], None)
            .await;
        assert!(matches!(
            result,
            Err(CheckoutError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[tokio::test]
    async fn rejects_duplicate_products_without_merging() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store.clone());

        let result = service
            .create_order(
                OwnerId::new("owner-1"),
                vec![line(&product, 1), line(&product, 2)],
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::DuplicateProduct(id)) if id == product.id
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn rejects_unknown_product() {
        let service = OrderService::new(InMemoryStore::new());
        let missing = ProductId::new();

        let result = service
            .create_order(
                OwnerId::new("owner-1"),
                vec![OrderLine {
                    product_id: missing,
                    quantity: 1,
                }],
                None,
            )
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Store(StoreError::UnknownProduct(id))) if id == missing
        ));
    }

    #[tokio::test]
    async fn retried_request_returns_identical_response() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store.clone());

        let items = vec![line(&product, 2)];
        let first = service
            .create_order(
                OwnerId::new("owner-1"),
                items.clone(),
                Some("idem-123".to_string()),
            )
            .await
            .unwrap();
        let second = service
            .create_order(OwnerId::new("owner-1"), items, Some("idem-123".to_string()))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.product(product.id).await.unwrap().unwrap().stock_qty, 3);
    }

    #[tokio::test]
    async fn reordered_items_still_deduplicate() {
        let store = InMemoryStore::new();
        let a = seed_product(&store, 1000, 5).await;
        let b = seed_product(&store, 2000, 5).await;
        let service = OrderService::new(store.clone());

        let first = service
            .create_order(
                OwnerId::new("owner-1"),
                vec![line(&a, 1), line(&b, 2)],
                Some("key-1".to_string()),
            )
            .await
            .unwrap();
        let second = service
            .create_order(
                OwnerId::new("owner-1"),
                vec![line(&b, 2), line(&a, 1)],
                Some("key-1".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn key_reuse_with_different_payload_conflicts() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store.clone());

        service
            .create_order(
                OwnerId::new("owner-1"),
                vec![line(&product, 1)],
                Some("key-1".to_string()),
            )
            .await
            .unwrap();

        let result = service
            .create_order(
                OwnerId::new("owner-1"),
                vec![line(&product, 2)],
                Some("key-1".to_string()),
            )
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Store(StoreError::IdempotencyConflict { .. }))
        ));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn order_view_is_owner_scoped() {
        let store = InMemoryStore::new();
        let product = seed_product(&store, 1000, 5).await;
        let service = OrderService::new(store);

        let view = service
            .create_order(OwnerId::new("owner-1"), vec![line(&product, 1)], None)
            .await
            .unwrap();

        let mine = service
            .order_view(&OwnerId::new("owner-1"), view.id)
            .await
            .unwrap();
        assert_eq!(mine, Some(view.clone()));

        let theirs = service
            .order_view(&OwnerId::new("owner-2"), view.id)
            .await
            .unwrap();
        assert!(theirs.is_none());
    }
}
