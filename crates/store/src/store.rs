use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, OwnerId, ProductId};

use crate::{
    EventId, IdempotencyRecord, NewProduct, OrderDraft, OrderItemRecord, OrderRecord, OrderView,
    OutboxEvent, OutboxStatus, ProductRecord, Result, RetryPolicy,
};

/// Default duration a claimed outbox event is leased to a worker.
///
/// While the lease holds, the event is not due, so no other worker can
/// claim it. If the claimer crashes without recording an outcome, the
/// event becomes due again when the lease expires, preserving
/// at-least-once delivery.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(30);

/// Core trait for order-store implementations.
///
/// Each method is one atomic unit of work: it either fully commits or
/// leaves no trace. Callers cannot observe or create partial states, which
/// is what carries the exactly-once-effective guarantees across process
/// crashes and concurrent requests.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Seeds a product into the catalog.
    ///
    /// Exists for the external catalog collaborator and for tests; the
    /// order core itself only ever reads and decrements stock.
    async fn create_product(&self, product: NewProduct) -> Result<ProductRecord>;

    /// Fetches a product by id.
    async fn product(&self, id: ProductId) -> Result<Option<ProductRecord>>;

    /// Atomically creates an order from a validated draft.
    ///
    /// In one transaction: checks the idempotency record (replaying the
    /// stored response on a fingerprint match, failing with
    /// [`crate::StoreError::IdempotencyConflict`] on a mismatch), locks all
    /// referenced products in ascending id order, validates existence and
    /// stock, persists the order and its items with price snapshots,
    /// decrements stock, and writes the idempotency record.
    ///
    /// Concurrent duplicates racing on the same key are arbitrated by the
    /// unique constraint on (owner, key): the loser discards its own work,
    /// re-reads the winner's record, and returns the stored response.
    ///
    /// On any failure nothing survives: no order, no stock change, no
    /// idempotency record.
    async fn place_order(&self, draft: OrderDraft) -> Result<OrderView>;

    /// Fetches the idempotency record for (owner, key), if any.
    async fn idempotency_record(
        &self,
        owner: &OwnerId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Fetches an order by id regardless of owner.
    async fn order(&self, id: OrderId) -> Result<Option<OrderRecord>>;

    /// Fetches an order by id, scoped to its owner.
    async fn order_for_owner(&self, owner: &OwnerId, id: OrderId) -> Result<Option<OrderRecord>>;

    /// Lists all orders belonging to an owner, oldest first.
    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<OrderRecord>>;

    /// Fetches the items of an order, ordered by product id.
    async fn order_items(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>>;

    /// Atomically confirms payment for an order.
    ///
    /// In one transaction: verifies the order is in
    /// [`OrderStatus::PendingPayment`], advances it to
    /// [`OrderStatus::Paid`] with a refreshed `updated_at`, and appends
    /// exactly one `order.paid` outbox event. The event can never exist
    /// without the PAID write having committed, and vice versa.
    async fn confirm_payment(&self, order_id: OrderId) -> Result<OrderRecord>;

    /// Atomically advances an order's status from `from` to `to`.
    ///
    /// Fails with [`crate::StoreError::InvalidTransition`] if the order is
    /// not currently in `from` or if the step is not a legal forward
    /// advance. This is the only write path for statuses beyond payment
    /// confirmation, which keeps transitions monotonic.
    async fn advance_order(
        &self,
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<OrderRecord>;

    /// Claims up to `limit` due, unclaimed outbox events, oldest first.
    ///
    /// Claiming atomically leases each returned event by pushing its
    /// `next_attempt_at` past `now`, so a concurrent claimer cannot take
    /// the same event while the lease holds. Events left leased by a
    /// crashed worker become claimable again once the lease expires.
    async fn claim_due(&self, limit: i64, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>>;

    /// Marks a claimed event as successfully processed (terminal).
    ///
    /// Applies only while the event is still pending; calling it on an
    /// already-terminal event is a harmless no-op.
    async fn mark_processed(&self, event: &OutboxEvent) -> Result<()>;

    /// Records a failed delivery attempt.
    ///
    /// Increments the attempt count and, per `policy`, either reschedules
    /// the event with exponential backoff or dead-letters it with a
    /// far-future `next_attempt_at`. Returns the status the event moved
    /// to.
    async fn mark_failed(
        &self,
        event: &OutboxEvent,
        error: &str,
        policy: &RetryPolicy,
    ) -> Result<OutboxStatus>;

    /// Fetches an outbox event by id.
    async fn outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>>;
}
