//! Payment confirmation service.

use common::{OrderId, OwnerId};
use store::{OrderRecord, OrderStore, StoreError};

use crate::error::Result;

/// Service for confirming payment on pending orders.
///
/// Confirmation advances the order to PAID and appends the `order.paid`
/// outbox event in one transactional unit; no caller can perform one
/// without the other.
pub struct PaymentService<S> {
    store: S,
}

impl<S: OrderStore> PaymentService<S> {
    /// Creates a new payment service with the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Confirms payment for one of the owner's orders.
    ///
    /// Fails with [`StoreError::OrderNotFound`] if the order does not
    /// exist or belongs to another owner, and with
    /// [`StoreError::InvalidTransition`] if the order is not awaiting
    /// payment.
    #[tracing::instrument(skip(self), fields(owner = %owner, order_id = %order_id))]
    pub async fn confirm_payment(&self, owner: &OwnerId, order_id: OrderId) -> Result<OrderRecord> {
        let order = self
            .store
            .order_for_owner(owner, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;

        let paid = self.store.confirm_payment(order.id).await?;
        tracing::info!(order_id = %paid.id, "payment confirmed");
        Ok(paid)
    }
}
