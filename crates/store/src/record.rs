//! Persistent record types and the order-creation input.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, OwnerId, ProductId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A catalog product with its authoritative stock count.
///
/// Stock is mutated only by [`crate::OrderStore::place_order`] under a row
/// lock; this core never creates or deletes products outside of
/// [`crate::OrderStore::create_product`], which exists for the catalog
/// collaborator and for test seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRecord {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock_qty: i32,
    pub created_at: DateTime<Utc>,
}

/// Input for seeding a product into the catalog.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock_qty: i32,
}

/// An order as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRecord {
    pub id: OrderId,
    pub owner_id: OwnerId,
    pub status: OrderStatus,
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line of an order with the unit price snapshotted at purchase time.
///
/// The snapshot is immutable once written: later catalog price changes
/// must not affect historical orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItemRecord {
    pub id: Uuid,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Money,
}

/// A write-once record mapping (owner, client key) to the response that
/// was computed for the first request carrying that key.
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub owner_id: OwnerId,
    pub key: String,
    pub fingerprint: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Replays the stored response for a retried request.
    ///
    /// The supplied fingerprint must match the one the record was created
    /// with; a mismatch means the key was reused with a different payload
    /// and is rejected as a conflict, never silently accepted.
    pub fn replay(&self, fingerprint: &str) -> crate::Result<crate::OrderView> {
        if self.fingerprint != fingerprint {
            return Err(crate::StoreError::IdempotencyConflict {
                key: self.key.clone(),
            });
        }
        Ok(serde_json::from_value(self.response.clone())?)
    }
}

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i32,
}

/// Idempotency parameters accompanying an order draft.
#[derive(Debug, Clone)]
pub struct IdempotencyInput {
    /// Client-supplied key, unique per owner.
    pub key: String,
    /// Hash of the normalized item list, used to detect key reuse with a
    /// different payload.
    pub fingerprint: String,
}

/// A validated order-creation request, ready to be committed atomically.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub owner_id: OwnerId,
    pub lines: Vec<OrderLine>,
    pub idempotency: Option<IdempotencyInput>,
}
