use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, OwnerId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    DEFAULT_CLAIM_LEASE, EventId, IdempotencyRecord, NewOutboxEvent, NewProduct, OrderDraft,
    OrderItemRecord, OrderRecord, OrderView, OutboxEvent, OutboxStatus, ProductRecord, Result,
    RetryPolicy, StoreError, store::OrderStore,
};

/// PostgreSQL-backed order store.
///
/// Atomicity comes from database transactions; the claim protocol uses
/// `FOR UPDATE SKIP LOCKED` so competing workers never select the same
/// rows, combined with the lease on `next_attempt_at`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Overrides the claim lease duration.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: PgRow) -> Result<ProductRecord> {
        Ok(ProductRecord {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_qty: row.try_get("stock_qty")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        Ok(OrderRecord {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner_id: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            status: parse_order_status(&row.try_get::<String, _>("status")?)?,
            total: Money::from_cents(row.try_get("total_cents")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItemRecord> {
        Ok(OrderItemRecord {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
        })
    }

    fn row_to_idempotency(row: PgRow) -> Result<IdempotencyRecord> {
        Ok(IdempotencyRecord {
            id: row.try_get("id")?,
            owner_id: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            key: row.try_get("key")?,
            fingerprint: row.try_get("fingerprint")?,
            response: row.try_get("response")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_outbox_event(row: PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            status: parse_outbox_status(&row.try_get::<String, _>("status")?)?,
            attempt_count: row.try_get("attempt_count")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            processed_at: row.try_get("processed_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus> {
    OrderStatus::parse(s).ok_or_else(|| {
        StoreError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
            "unknown order status: {s}"
        ))))
    })
}

fn parse_outbox_status(s: &str) -> Result<OutboxStatus> {
    OutboxStatus::parse(s).ok_or_else(|| {
        StoreError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
            "unknown outbox status: {s}"
        ))))
    })
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_product(&self, product: NewProduct) -> Result<ProductRecord> {
        let record = ProductRecord {
            id: ProductId::new(),
            sku: product.sku,
            name: product.name,
            price: product.price,
            stock_qty: product.stock_qty,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, price_cents, stock_qty, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.sku)
        .bind(&record.name)
        .bind(record.price.cents())
        .bind(record.stock_qty)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn product(&self, id: ProductId) -> Result<Option<ProductRecord>> {
        let row = sqlx::query(
            "SELECT id, sku, name, price_cents, stock_qty, created_at FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<OrderView> {
        let mut tx = self.pool.begin().await?;

        // Dedup path: a record for (owner, key) means this request already
        // ran to completion once.
        if let Some(idem) = &draft.idempotency {
            let existing = sqlx::query(
                r#"
                SELECT id, owner_id, key, fingerprint, response, created_at
                FROM idempotency_keys
                WHERE owner_id = $1 AND key = $2
                "#,
            )
            .bind(draft.owner_id.as_str())
            .bind(&idem.key)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                let record = Self::row_to_idempotency(row)?;
                return record.replay(&idem.fingerprint);
            }
        }

        // Lock all referenced products in ascending id order so concurrent
        // orders sharing products cannot deadlock.
        let mut product_ids: Vec<Uuid> =
            draft.lines.iter().map(|l| l.product_id.as_uuid()).collect();
        product_ids.sort();

        let rows = sqlx::query(
            r#"
            SELECT id, sku, name, price_cents, stock_qty, created_at
            FROM products
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&product_ids)
        .fetch_all(&mut *tx)
        .await?;

        let mut products: HashMap<ProductId, ProductRecord> = HashMap::new();
        for row in rows {
            let product = Self::row_to_product(row)?;
            products.insert(product.id, product);
        }

        for line in &draft.lines {
            let product = products
                .get(&line.product_id)
                .ok_or(StoreError::UnknownProduct(line.product_id))?;
            if line.quantity > product.stock_qty {
                return Err(StoreError::InsufficientStock {
                    sku: product.sku.clone(),
                    requested: line.quantity,
                    available: product.stock_qty,
                });
            }
        }

        let total: Money = draft
            .lines
            .iter()
            .map(|l| products[&l.product_id].price.multiply(l.quantity as i64))
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

        sqlx::query(
            r#"
            INSERT INTO orders (id, owner_id, status, total_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.owner_id.as_str())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let product = &products[&line.product_id];
            let item = OrderItemRecord {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: product.id,
                quantity: line.quantity,
                unit_price: product.price,
            };

            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, product_id, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id)
            .bind(item.order_id.as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.quantity)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE products SET stock_qty = stock_qty - $1 WHERE id = $2")
                .bind(line.quantity)
                .bind(product.id.as_uuid())
                .execute(&mut *tx)
                .await?;

            items.push(item);
        }

        let view = OrderView::from_records(&order, &items);

        if let Some(idem) = &draft.idempotency {
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency_keys (id, owner_id, key, fingerprint, response, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (owner_id, key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(draft.owner_id.as_str())
            .bind(&idem.key)
            .bind(&idem.fingerprint)
            .bind(serde_json::to_value(&view)?)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                // A concurrent request with the same key won the race.
                // Discard our order and stock change, then return the
                // winner's stored response instead of erroring the caller.
                tracing::warn!(
                    owner = %draft.owner_id,
                    key = %idem.key,
                    "lost idempotency race, replaying stored response"
                );
                tx.rollback().await?;
                let record = self
                    .idempotency_record(&draft.owner_id, &idem.key)
                    .await?
                    .ok_or_else(|| StoreError::IdempotencyConflict {
                        key: idem.key.clone(),
                    })?;
                return record.replay(&idem.fingerprint);
            }
        }

        tx.commit().await?;
        Ok(view)
    }

    async fn idempotency_record(
        &self,
        owner: &OwnerId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, key, fingerprint, response, created_at
            FROM idempotency_keys
            WHERE owner_id = $1 AND key = $2
            "#,
        )
        .bind(owner.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_idempotency).transpose()
    }

    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, status, total_cents, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn order_for_owner(&self, owner: &OwnerId, id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, status, total_cents, created_at, updated_at
            FROM orders
            WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, status, total_cents, created_at, updated_at
            FROM orders
            WHERE owner_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, unit_price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY product_id
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn confirm_payment(&self, order_id: OrderId) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, owner_id, status, total_cents, created_at, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::OrderNotFound(order_id))?;

        let mut order = Self::row_to_order(row)?;
        if !order.status.can_confirm_payment() {
            return Err(StoreError::InvalidTransition {
                current: order.status,
                requested: OrderStatus::Paid,
            });
        }

        let now = Utc::now();
        order.status = OrderStatus::Paid;
        order.updated_at = now;

        sqlx::query("UPDATE orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;

        let event = NewOutboxEvent::order_paid(&order);
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, aggregate_type, aggregate_id, event_type, payload,
                 status, attempt_count, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6, $6)
            "#,
        )
        .bind(EventId::new().as_uuid())
        .bind(&event.aggregate_type)
        .bind(event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
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

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING id, owner_id, status, total_cents, created_at, updated_at
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_order(row),
            None => {
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                        .bind(order_id.as_uuid())
                        .fetch_optional(&self.pool)
                        .await?;

                match current {
                    Some(status) => Err(StoreError::InvalidTransition {
                        current: parse_order_status(&status)?,
                        requested: to,
                    }),
                    None => Err(StoreError::OrderNotFound(order_id)),
                }
            }
        }
    }

    async fn claim_due(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        let lease_until = now + chrono::Duration::milliseconds(self.claim_lease.as_millis() as i64);

        // SKIP LOCKED keeps concurrent claimers off the same rows while
        // this statement runs; the lease on next_attempt_at keeps them off
        // for the rest of the batch.
        let rows = sqlx::query(
            r#"
            WITH claimed AS (
                SELECT id
                FROM outbox_events
                WHERE status = 'PENDING' AND next_attempt_at <= $1
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events o
            SET next_attempt_at = $3
            FROM claimed c
            WHERE o.id = c.id
            RETURNING o.id, o.aggregate_type, o.aggregate_id, o.event_type, o.payload,
                      o.status, o.attempt_count, o.next_attempt_at, o.processed_at,
                      o.last_error, o.created_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await?;

        let mut events: Vec<OutboxEvent> = rows
            .into_iter()
            .map(Self::row_to_outbox_event)
            .collect::<Result<_>>()?;
        // UPDATE ... RETURNING does not guarantee row order.
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn mark_processed(&self, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PROCESSED', processed_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

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

        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = $2, attempt_count = $3, next_attempt_at = $4, last_error = $5
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(status.as_str())
        .bind(attempt)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(status)
    }

    async fn outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   status, attempt_count, next_attempt_at, processed_at,
                   last_error, created_at
            FROM outbox_events
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_outbox_event).transpose()
    }
}
