//! Event processor: dispatches outbox events to type-specific handlers.

use std::collections::HashMap;

use async_trait::async_trait;
use common::OrderStatus;
use store::{OrderPaidPayload, OrderStore, OutboxEvent, event_types};

use crate::error::{ProcessError, Result};

/// A side-effecting handler for one event type.
///
/// Delivery is at-least-once, so handlers must tolerate seeing the same
/// event more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event type this handler consumes.
    fn event_type(&self) -> &'static str;

    /// Handles a single event.
    async fn handle(&self, event: &OutboxEvent) -> Result<()>;
}

/// Dispatches events to registered handlers by event type.
///
/// Unrecognized event types are logged and treated as successfully
/// processed, so newer producers cannot block the queue or force retries
/// forever.
#[derive(Default)]
pub struct EventProcessor {
    handlers: HashMap<&'static str, Box<dyn EventHandler>>,
}

impl EventProcessor {
    /// Creates a processor with no handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for its event type.
    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        self.handlers.insert(handler.event_type(), handler);
    }

    /// Returns the number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Routes an event to its handler.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: &OutboxEvent) -> Result<()> {
        match self.handlers.get(event.event_type.as_str()) {
            Some(handler) => handler.handle(event).await,
            None => {
                tracing::info!("ignoring unrecognized event type");
                Ok(())
            }
        }
    }
}

/// Handles `order.paid`: advances the referenced order to fulfilled.
pub struct OrderPaidHandler<S> {
    store: S,
}

impl<S: OrderStore> OrderPaidHandler<S> {
    /// Creates a new handler over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: OrderStore> EventHandler for OrderPaidHandler<S> {
    fn event_type(&self) -> &'static str {
        event_types::ORDER_PAID
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<()> {
        let payload: OrderPaidPayload = serde_json::from_value(event.payload.clone())?;

        let Some(order) = self.store.order(payload.order_id).await? else {
            return Err(ProcessError::MissingOrder {
                event_id: event.id,
                order_id: payload.order_id,
            });
        };

        // Redelivery of an already-handled event: nothing left to do.
        if order.status == OrderStatus::Fulfilled {
            tracing::debug!(order_id = %order.id, "order already fulfilled");
            return Ok(());
        }

        self.store
            .advance_order(order.id, OrderStatus::Paid, OrderStatus::Fulfilled)
            .await?;
        tracing::info!(order_id = %order.id, "order fulfilled");
        metrics::counter!("orders_fulfilled").increment(1);
        Ok(())
    }
}
