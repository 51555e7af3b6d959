//! Outbox event types and the retry policy applied to failed deliveries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{OrderId, OwnerId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type names carried by outbox events.
pub mod event_types {
    /// Emitted when an order's payment is confirmed.
    pub const ORDER_PAID: &str = "order.paid";
}

/// Unique identifier for an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery state of an outbox event.
///
/// `Pending` events are claimable once due; `Processed` and `Dead` are
/// terminal. A dead event is retained for inspection, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Dead,
}

impl OutboxStatus {
    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "PROCESSED" => Some(OutboxStatus::Processed),
            "DEAD" => Some(OutboxStatus::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event in the transactional outbox.
///
/// Created in the same transaction as the state change it announces, so
/// the event cannot exist without the change having committed, and vice
/// versa.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A business fact about to be appended to the outbox.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Payload of an [`event_types::ORDER_PAID`] event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidPayload {
    pub order_id: OrderId,
    pub owner_id: OwnerId,
}

impl NewOutboxEvent {
    /// Builds the `order.paid` event for an order.
    pub fn order_paid(order: &crate::OrderRecord) -> Self {
        let payload = OrderPaidPayload {
            order_id: order.id,
            owner_id: order.owner_id.clone(),
        };
        Self {
            aggregate_type: "order".to_string(),
            aggregate_id: order.id.as_uuid(),
            event_type: event_types::ORDER_PAID.to_string(),
            // OrderPaidPayload serialization cannot fail: two plain fields.
            payload: serde_json::to_value(payload).unwrap_or_default(),
        }
    }
}

/// How long a dead event's `next_attempt_at` is pushed into the future.
/// The event stays claimable-never but inspectable forever.
const DEAD_RETENTION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Exponential backoff with jitter for failed deliveries.
///
/// `delay(attempt) = min(cap, base * 2^attempt) + uniform(0, 0.5 * capped)`.
/// The jitter desynchronizes retries of events that failed at the same
/// moment, such as during a downstream outage.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// Calculates the delay before the given retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
        let capped = exp.min(self.cap.as_secs_f64());
        let jitter = rand::thread_rng().r#gen::<f64>() * 0.5 * capped;
        Duration::from_secs_f64(capped + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        }
    }
}

/// Retry policy applied by [`crate::OrderStore::mark_failed`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after which an event is dead-lettered.
    pub max_attempts: i32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Decides the outcome of a failed delivery attempt.
    ///
    /// Returns the status the event moves to and its new `next_attempt_at`.
    pub fn disposition(&self, attempt: i32, now: DateTime<Utc>) -> (OutboxStatus, DateTime<Utc>) {
        if attempt >= self.max_attempts {
            (OutboxStatus::Dead, now + to_chrono(DEAD_RETENTION))
        } else {
            let delay = self.backoff.delay_for_attempt(attempt.max(0) as u32);
            (OutboxStatus::Pending, now + to_chrono(delay))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff: Backoff::default(),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_within_jitter_bounds() {
        let backoff = Backoff {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        };

        for attempt in 0..4 {
            let expected = 2f64 * 2f64.powi(attempt as i32);
            for _ in 0..50 {
                let delay = backoff.delay_for_attempt(attempt).as_secs_f64();
                assert!(delay >= expected, "attempt {attempt}: {delay} < {expected}");
                assert!(
                    delay < expected * 1.5,
                    "attempt {attempt}: {delay} >= {}",
                    expected * 1.5
                );
            }
        }
    }

    #[test]
    fn backoff_delay_is_capped() {
        let backoff = Backoff {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
        };

        // 2 * 2^10 = 2048s, far beyond the 60s cap.
        for _ in 0..50 {
            let delay = backoff.delay_for_attempt(10).as_secs_f64();
            assert!(delay >= 60.0);
            assert!(delay < 90.0);
        }
    }

    #[test]
    fn backoff_survives_huge_attempt_numbers() {
        let backoff = Backoff::default();
        let delay = backoff.delay_for_attempt(u32::MAX);
        assert!(delay.as_secs_f64() < 90.0);
    }

    #[test]
    fn disposition_retries_below_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 8,
            backoff: Backoff::default(),
        };
        let now = Utc::now();

        let (status, next) = policy.disposition(1, now);
        assert_eq!(status, OutboxStatus::Pending);
        assert!(next > now);
        assert!(next < now + chrono::Duration::days(1));
    }

    #[test]
    fn disposition_dead_letters_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Backoff::default(),
        };
        let now = Utc::now();

        let (status, next) = policy.disposition(3, now);
        assert_eq!(status, OutboxStatus::Dead);
        // Pushed roughly a year out, never due again in practice.
        assert!(next > now + chrono::Duration::days(300));
    }

    #[test]
    fn outbox_status_roundtrip() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Processed,
            OutboxStatus::Dead,
        ] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("IN_FLIGHT"), None);
    }

    #[test]
    fn order_paid_event_carries_order_and_owner() {
        let order = crate::OrderRecord {
            id: common::OrderId::new(),
            owner_id: common::OwnerId::new("owner-1"),
            status: common::OrderStatus::Paid,
            total: common::Money::from_cents(2500),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let event = NewOutboxEvent::order_paid(&order);
        assert_eq!(event.event_type, event_types::ORDER_PAID);
        assert_eq!(event.aggregate_type, "order");
        assert_eq!(event.aggregate_id, order.id.as_uuid());

        let payload: OrderPaidPayload = serde_json::from_value(event.payload).unwrap();
        assert_eq!(payload.order_id, order.id);
        assert_eq!(payload.owner_id, order.owner_id);
    }
}
