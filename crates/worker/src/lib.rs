//! Outbox worker: claims due events and drives order-status transitions.
//!
//! Any number of worker instances may run against the same store; the
//! claim protocol guarantees no event is handled by two workers at once,
//! and per-event failure accounting (retry with backoff, then dead-letter)
//! keeps one poisoned event from stalling the rest of the queue.

pub mod config;
pub mod error;
pub mod processor;
pub mod runner;

pub use config::WorkerConfig;
pub use error::{ProcessError, Result};
pub use processor::{EventHandler, EventProcessor, OrderPaidHandler};
pub use runner::Worker;
