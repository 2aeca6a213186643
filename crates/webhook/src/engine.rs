use std::sync::Arc;
use std::time::Duration;

use apigate_core::{DeliveryStatus, Event, MeteringStore, WebhookDelivery};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatcher;
use crate::error::WebhookError;

/// Fans events out to subscribing webhooks and drives their delivery/retry
/// lifecycle.
pub struct WebhookEngine {
    store: Arc<dyn MeteringStore>,
    client: reqwest::Client,
    /// Caps how many deliveries are dispatched concurrently per sweep.
    pool_size: usize,
}

impl WebhookEngine {
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            pool_size: 8,
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Fan `event` out to every subscribing, enabled webhook, recording one
    /// `pending` [`WebhookDelivery`] per match.
    ///
    /// # Errors
    /// Returns a [`WebhookError`] if listing webhooks or inserting a
    /// delivery fails.
    pub async fn publish(&self, event: &Event) -> Result<usize, WebhookError> {
        let webhooks = self.store.list_webhooks().await?;
        let now = Utc::now();
        let mut dispatched = 0;

        for webhook in webhooks.iter().filter(|w| w.subscribes_to(event.event_type, event.user_id)) {
            let payload = serde_json::json!({
                "id": event.id,
                "type": event.event_type,
                "timestamp": event.timestamp,
                "data": event.data,
            });

            let delivery = WebhookDelivery {
                id: Uuid::now_v7(),
                webhook_id: webhook.id,
                event_id: event.id,
                event_type: event.event_type,
                payload,
                status: DeliveryStatus::Pending,
                attempt: 1,
                max_attempts: webhook.retry_count,
                status_code: None,
                response_body: None,
                error: None,
                duration_ms: None,
                next_retry: None,
                created_at: now,
                updated_at: now,
            };

            self.store.insert_webhook_delivery(delivery).await?;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Dispatch every delivery currently due (`status=pending`, or
    /// `status=retrying` with an elapsed `next_retry`), up to `pool_size`
    /// concurrently.
    ///
    /// # Errors
    /// Returns a [`WebhookError`] if listing due deliveries fails. Per-item
    /// dispatch/persistence failures are logged, not propagated — one bad
    /// webhook must never stall the sweep.
    pub async fn dispatch_due(&self, now: chrono::DateTime<Utc>) -> Result<usize, WebhookError> {
        use futures::stream::{self, StreamExt};

        let due = self.store.list_due_webhook_deliveries(now).await?;
        if due.is_empty() {
            return Ok(0);
        }

        let webhooks = self.store.list_webhooks().await?;
        let dispatched = stream::iter(due.into_iter().filter_map(|delivery| {
            webhooks
                .iter()
                .find(|w| w.id == delivery.webhook_id)
                .cloned()
                .map(|webhook| (webhook, delivery))
        }))
        .map(|(webhook, delivery)| async move {
            match dispatcher::dispatch(&self.client, &webhook, delivery).await {
                Ok(updated) => {
                    if let Err(e) = self.store.update_webhook_delivery(updated).await {
                        warn!(error = %e, "failed to persist webhook delivery outcome");
                    }
                    true
                }
                Err(e) => {
                    warn!(error = %e, "failed to build webhook dispatch request");
                    false
                }
            }
        })
        .buffer_unordered(self.pool_size)
        .filter(|ok| std::future::ready(*ok))
        .count()
        .await;

        Ok(dispatched)
    }

    /// Run the periodic retry-sweep loop until a shutdown signal arrives on
    /// `shutdown_rx`. The in-flight sweep is allowed to finish before
    /// exiting.
    pub async fn run_retry_scheduler(self: Arc<Self>, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("webhook retry scheduler received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    match self.dispatch_due(Utc::now()).await {
                        Ok(n) if n > 0 => info!(dispatched = n, "webhook retry sweep"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "webhook retry sweep failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_core::EventType;
    use apigate_metering_memory::MemoryMeteringStore;

    fn test_event(event_type: EventType, user_id: Option<Uuid>) -> Event {
        Event::new(event_type, user_id, serde_json::json!({}))
    }

    #[tokio::test]
    async fn publish_creates_one_delivery_per_subscribing_webhook() {
        let memory = Arc::new(MemoryMeteringStore::new());
        let hook = apigate_metering::fixture_webhook(None, &[EventType::KeyCreated]);
        memory.insert_webhook(hook);

        let engine = WebhookEngine::new(memory.clone());
        let count = engine.publish(&test_event(EventType::KeyCreated, None)).await.unwrap();
        assert_eq!(count, 1);

        let due = memory.list_due_webhook_deliveries(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn publish_skips_unsubscribed_webhooks() {
        let memory = Arc::new(MemoryMeteringStore::new());
        let hook = apigate_metering::fixture_webhook(None, &[EventType::UsageLimit]);
        memory.insert_webhook(hook);

        let engine = WebhookEngine::new(memory.clone());
        let count = engine.publish(&test_event(EventType::KeyCreated, None)).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn dispatch_due_is_noop_when_nothing_due() {
        let memory = Arc::new(MemoryMeteringStore::new());
        let engine = WebhookEngine::new(memory);
        let dispatched = engine.dispatch_due(Utc::now()).await.unwrap();
        assert_eq!(dispatched, 0);
    }
}
