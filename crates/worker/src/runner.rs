//! The polling worker loop.

use chrono::Utc;
use store::{OrderStore, OutboxStatus, StoreError};
use tokio::time::sleep;

use crate::config::WorkerConfig;
use crate::processor::EventProcessor;

/// Persisted error messages are bounded to this many characters.
const MAX_ERROR_LEN: usize = 1000;

/// A long-running polling worker over the outbox.
///
/// Each pass claims a batch of due events and handles every event
/// independently: one event's failure is recorded and never rolls back or
/// blocks another's success, and no handler error crashes the loop. A
/// non-empty batch loops again immediately to drain bursts; the poll
/// interval only applies when the queue is empty.
pub struct Worker<S> {
    store: S,
    processor: EventProcessor,
    config: WorkerConfig,
}

impl<S: OrderStore> Worker<S> {
    /// Creates a worker over the given store, processor, and configuration.
    pub fn new(store: S, processor: EventProcessor, config: WorkerConfig) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    /// Runs the polling loop until the future is dropped.
    pub async fn run(&self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "worker started"
        );

        loop {
            match self.run_once().await {
                Ok(0) => sleep(self.config.poll_interval).await,
                Ok(claimed) => {
                    // Burst: keep draining before falling back to polling.
                    tracing::debug!(claimed, "batch drained");
                }
                Err(error) => {
                    tracing::error!(%error, "claim pass failed");
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Claims and processes one batch; returns the number of claimed events.
    pub async fn run_once(&self) -> Result<usize, StoreError> {
        let policy = self.config.retry_policy();
        let events = self
            .store
            .claim_due(self.config.batch_size, Utc::now())
            .await?;

        for event in &events {
            match self.processor.handle(event).await {
                Ok(()) => match self.store.mark_processed(event).await {
                    Ok(()) => {
                        metrics::counter!("outbox_events_processed").increment(1);
                    }
                    Err(error) => {
                        tracing::error!(event_id = %event.id, %error, "failed to record success");
                    }
                },
                Err(error) => {
                    let message = truncated(&error.to_string());
                    tracing::warn!(
                        event_id = %event.id,
                        attempt = event.attempt_count + 1,
                        %error,
                        "event handler failed"
                    );

                    match self.store.mark_failed(event, &message, &policy).await {
                        Ok(OutboxStatus::Dead) => {
                            tracing::error!(event_id = %event.id, "event dead-lettered");
                            metrics::counter!("outbox_events_dead").increment(1);
                        }
                        Ok(_) => {
                            metrics::counter!("outbox_events_retried").increment(1);
                        }
                        Err(store_error) => {
                            tracing::error!(
                                event_id = %event.id,
                                error = %store_error,
                                "failed to record failure"
                            );
                        }
                    }
                }
            }
        }

        Ok(events.len())
    }
}

fn truncated(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}
