//! Durable store for orders, stock, idempotency records, and the
//! transactional outbox.
//!
//! The [`OrderStore`] trait models every atomic unit of the system as a
//! single method, so the co-transactional invariants (stock reservation
//! with order creation, PAID write with outbox append) cannot be split up
//! by callers. Two implementations are provided: [`PostgresStore`] for
//! production and [`InMemoryStore`] for tests.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod record;
pub mod store;
pub mod view;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use outbox::{
    Backoff, EventId, NewOutboxEvent, OrderPaidPayload, OutboxEvent, OutboxStatus, RetryPolicy,
    event_types,
};
pub use postgres::PostgresStore;
pub use record::{
    IdempotencyInput, IdempotencyRecord, NewProduct, OrderDraft, OrderItemRecord, OrderLine,
    OrderRecord, ProductRecord,
};
pub use self::store::{DEFAULT_CLAIM_LEASE, OrderStore};
pub use view::{OrderLineView, OrderView};
