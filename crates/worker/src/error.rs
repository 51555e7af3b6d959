//! Event processing error types.

use common::OrderId;
use store::{EventId, StoreError};
use thiserror::Error;

/// Errors that can occur while processing an outbox event.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The event references an order that does not exist.
    ///
    /// Co-transactional event creation makes this a data-integrity bug,
    /// not a transient condition; it is never silently dropped. It still
    /// goes through attempt accounting so the event reaches DEAD instead
    /// of looping forever.
    #[error("Event {event_id} references missing order {order_id}")]
    MissingOrder {
        event_id: EventId,
        order_id: OrderId,
    },

    /// The event payload does not decode to the expected shape.
    #[error("Malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// An error occurred in the order store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for event processing.
pub type Result<T> = std::result::Result<T, ProcessError>;
