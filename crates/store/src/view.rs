//! The client-visible order response.
//!
//! This shape is persisted verbatim inside idempotency records, so a
//! retried request replays the exact response computed for the first
//! attempt. Field names and types are therefore part of the stored format,
//! not just the wire format.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, OrderStatus, ProductId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An order as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: OrderId,
    pub status: OrderStatus,
    pub total_cents: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderLineView>,
}

/// One line of an order as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineView {
    pub id: Uuid,
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price_cents: Money,
}

impl OrderView {
    /// Builds a view from persisted records.
    ///
    /// Items are ordered by product id so the same order always renders
    /// the same view, regardless of how its rows were fetched.
    pub fn from_records(order: &crate::OrderRecord, items: &[crate::OrderItemRecord]) -> Self {
        let mut lines: Vec<OrderLineView> = items
            .iter()
            .map(|item| OrderLineView {
                id: item.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price_cents: item.unit_price,
            })
            .collect();
        lines.sort_by_key(|line| line.product_id);

        Self {
            id: order.id,
            status: order.status,
            total_cents: order.total,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OwnerId;

    #[test]
    fn view_items_are_sorted_by_product_id() {
        let order = crate::OrderRecord {
            id: OrderId::new(),
            owner_id: OwnerId::new("owner"),
            status: OrderStatus::PendingPayment,
            total: Money::from_cents(3000),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut products = [ProductId::new(), ProductId::new(), ProductId::new()];
        products.sort();
        // Insert out of order
        let items: Vec<_> = [products[2], products[0], products[1]]
            .into_iter()
            .map(|pid| crate::OrderItemRecord {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: pid,
                quantity: 1,
                unit_price: Money::from_cents(1000),
            })
            .collect();

        let view = OrderView::from_records(&order, &items);
        assert_eq!(view.items[0].product_id, products[0]);
        assert_eq!(view.items[1].product_id, products[1]);
        assert_eq!(view.items[2].product_id, products[2]);
    }

    #[test]
    fn view_serialization_roundtrip() {
        let order = crate::OrderRecord {
            id: OrderId::new(),
            owner_id: OwnerId::new("owner"),
            status: OrderStatus::Paid,
            total: Money::from_cents(2500),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let view = OrderView::from_records(&order, &[]);

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["status"], "PAID");
        assert_eq!(value["total_cents"], 2500);

        let back: OrderView = serde_json::from_value(value).unwrap();
        assert_eq!(back, view);
    }
}
