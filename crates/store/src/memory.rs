use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, OwnerId, ProductId};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    DEFAULT_CLAIM_LEASE, EventId, IdempotencyRecord, NewOutboxEvent, NewProduct, OrderDraft,
    OrderItemRecord, OrderRecord, OrderView, OutboxEvent, OutboxStatus, ProductRecord, Result,
    RetryPolicy, StoreError, store::OrderStore,
};

/// In-memory order store implementation for testing.
///
/// One mutex guards the whole state, so every trait method is trivially
/// atomic: validation happens before any mutation, and an early return
/// leaves the state untouched. This mirrors the transactional behavior of
/// the PostgreSQL implementation without a database.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
    claim_lease: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct Inner {
    products: HashMap<ProductId, ProductRecord>,
    // Vec keeps insertion order, which doubles as creation order for
    // listings and for oldest-first outbox claims.
    orders: Vec<OrderRecord>,
    order_items: HashMap<OrderId, Vec<OrderItemRecord>>,
    idempotency: Vec<IdempotencyRecord>,
    outbox: Vec<OutboxEvent>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Arc::default(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Overrides the claim lease duration.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.inner.lock().await.orders.len()
    }

    /// Returns the total number of outbox events stored.
    pub async fn outbox_count(&self) -> usize {
        self.inner.lock().await.outbox.len()
    }

    /// Test support: enqueues an event directly, bypassing the
    /// co-transactional creation paths.
    pub async fn push_event(&self, event: NewOutboxEvent) -> EventId {
        let mut inner = self.inner.lock().await;
        inner.push_outbox(event, Utc::now());
        inner.outbox.last().map(|e| e.id).unwrap_or_default()
    }
}

impl Inner {
    fn order_index(&self, id: OrderId) -> Option<usize> {
        self.orders.iter().position(|o| o.id == id)
    }

    fn push_outbox(&mut self, event: NewOutboxEvent, now: DateTime<Utc>) {
        self.outbox.push(OutboxEvent {
            id: EventId::new(),
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            payload: event.payload,
            status: OutboxStatus::Pending,
            attempt_count: 0,
            next_attempt_at: now,
            processed_at: None,
            last_error: None,
            created_at: now,
        });
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_product(&self, product: NewProduct) -> Result<ProductRecord> {
        let record = ProductRecord {
            id: ProductId::new(),
            sku: product.sku,
            name: product.name,
            price: product.price,
            stock_qty: product.stock_qty,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock().await;
        inner.products.insert(record.id, record.clone());
        Ok(record)
    }

    async fn product(&self, id: ProductId) -> Result<Option<ProductRecord>> {
        Ok(self.inner.lock().await.products.get(&id).cloned())
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<OrderView> {
        let mut inner = self.inner.lock().await;

        if let Some(idem) = &draft.idempotency
            && let Some(record) = inner
                .idempotency
                .iter()
                .find(|r| r.owner_id == draft.owner_id && r.key == idem.key)
        {
            return record.replay(&idem.fingerprint);
        }

        // Validate everything before mutating anything.
        let mut priced_lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let product = inner
                .products
                .get(&line.product_id)
                .ok_or(StoreError::UnknownProduct(line.product_id))?;
            if line.quantity > product.stock_qty {
                return Err(StoreError::InsufficientStock {
                    sku: product.sku.clone(),
                    requested: line.quantity,
                    available: product.stock_qty,
                });
            }
            priced_lines.push((line.product_id, line.quantity, product.price));
        }

        let total: Money = priced_lines
            .iter()
            .map(|(_, quantity, price)| price.multiply(*quantity as i64))
            .sum();

        let now = Utc::now();
        let order = OrderRecord {
            id: OrderId::new(),
            owner_id: draft.owner_id.clone(),
            status: OrderStatus::PendingPayment,
            total,
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(priced_lines.len());
        for (product_id, quantity, unit_price) in priced_lines {
            if let Some(product) = inner.products.get_mut(&product_id) {
                product.stock_qty -= quantity;
            }
            items.push(OrderItemRecord {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id,
                quantity,
                unit_price,
            });
        }

        let view = OrderView::from_records(&order, &items);

        if let Some(idem) = &draft.idempotency {
            inner.idempotency.push(IdempotencyRecord {
                id: Uuid::new_v4(),
                owner_id: draft.owner_id.clone(),
                key: idem.key.clone(),
                fingerprint: idem.fingerprint.clone(),
                response: serde_json::to_value(&view)?,
                created_at: now,
            });
        }

        inner.orders.push(order.clone());
        inner.order_items.insert(order.id, items);

        Ok(view)
    }

    async fn idempotency_record(
        &self,
        owner: &OwnerId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .idempotency
            .iter()
            .find(|r| &r.owner_id == owner && r.key == key)
            .cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn order_for_owner(&self, owner: &OwnerId, id: OrderId) -> Result<Option<OrderRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .find(|o| o.id == id && &o.owner_id == owner)
            .cloned())
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<OrderRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .filter(|o| &o.owner_id == owner)
            .cloned()
            .collect())
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>> {
        let inner = self.inner.lock().await;
        let mut items = inner.order_items.get(&order_id).cloned().unwrap_or_default();
        items.sort_by_key(|item| item.product_id);
        Ok(items)
    }

    async fn confirm_payment(&self, order_id: OrderId) -> Result<OrderRecord> {
        let mut inner = self.inner.lock().await;

        let index = inner
            .order_index(order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if !inner.orders[index].status.can_confirm_payment() {
            return Err(StoreError::InvalidTransition {
                current: inner.orders[index].status,
                requested: OrderStatus::Paid,
            });
        }

        let now = Utc::now();
        inner.orders[index].status = OrderStatus::Paid;
        inner.orders[index].updated_at = now;
        let order = inner.orders[index].clone();

        inner.push_outbox(NewOutboxEvent::order_paid(&order), now);
        Ok(order)
    }

    async fn advance_order(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderRecord> {
        if !from.can_advance_to(to) {
            return Err(StoreError::InvalidTransition {
                current: from,
                requested: to,
            });
        }

        let mut inner = self.inner.lock().await;
        let index = inner
            .order_index(order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if inner.orders[index].status != from {
            return Err(StoreError::InvalidTransition {
                current: inner.orders[index].status,
                requested: to,
            });
        }

        inner.orders[index].status = to;
        inner.orders[index].updated_at = Utc::now();
        Ok(inner.orders[index].clone())
    }

    async fn claim_due(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        let lease_until = now + chrono::Duration::milliseconds(self.claim_lease.as_millis() as i64);

        let mut inner = self.inner.lock().await;
        let mut claimed = Vec::new();
        for event in inner.outbox.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if event.status == OutboxStatus::Pending && event.next_attempt_at <= now {
                event.next_attempt_at = lease_until;
                claimed.push(event.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_processed(&self, event: &OutboxEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.outbox.iter_mut().find(|e| e.id == event.id)
            && stored.status == OutboxStatus::Pending
        {
            stored.status = OutboxStatus::Processed;
            stored.processed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        event: &OutboxEvent,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<OutboxStatus> {
        let attempt = event.attempt_count + 1;
        let (status, next_attempt_at) = policy.disposition(attempt, Utc::now());

        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner.outbox.iter_mut().find(|e| e.id == event.id)
            && stored.status == OutboxStatus::Pending
        {
            stored.status = status;
            stored.attempt_count = attempt;
            stored.next_attempt_at = next_attempt_at;
            stored.last_error = Some(error.to_string());
        }
        Ok(status)
    }

    async fn outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner.outbox.iter().find(|e| e.id == id).cloned())
    }
}
