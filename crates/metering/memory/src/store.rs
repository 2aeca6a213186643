use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use apigate_core::{
    MeteringStore, QuotaState, RateLimitWindowState, StoreError, UsageEvent, UsageSummary,
    Webhook, WebhookDelivery,
};

/// In-memory [`MeteringStore`]. Rate-limit windows, quota counters, the
/// usage log, usage summaries and webhook deliveries each get their own
/// map, keyed the way the durable Postgres binding keys its tables.
#[derive(Debug, Default)]
pub struct MemoryMeteringStore {
    rate_limit_windows: DashMap<Uuid, RateLimitWindowState>,
    quota_states: DashMap<(Uuid, DateTime<Utc>), QuotaState>,
    usage_events: DashMap<Uuid, UsageEvent>,
    usage_summaries: DashMap<(Uuid, DateTime<Utc>), UsageSummary>,
    webhooks: DashMap<Uuid, Webhook>,
    webhook_deliveries: DashMap<Uuid, WebhookDelivery>,
}

impl MemoryMeteringStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a webhook so it's returned by `list_webhooks`. Webhook
    /// registration itself is a control-plane concern outside `MeteringStore`.
    pub fn insert_webhook(&self, webhook: Webhook) {
        self.webhooks.insert(webhook.id, webhook);
    }
}

#[async_trait]
impl MeteringStore for MemoryMeteringStore {
    async fn get_rate_limit_window(
        &self,
        key_id: Uuid,
    ) -> Result<Option<RateLimitWindowState>, StoreError> {
        Ok(self.rate_limit_windows.get(&key_id).map(|e| e.clone()))
    }

    async fn put_rate_limit_window(&self, state: RateLimitWindowState) -> Result<(), StoreError> {
        self.rate_limit_windows.insert(state.key_id, state);
        Ok(())
    }

    async fn cleanup_rate_limit_windows(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let before_count = self.rate_limit_windows.len();
        self.rate_limit_windows.retain(|_, state| state.window_end >= before);
        #[allow(clippy::cast_possible_truncation)]
        Ok((before_count - self.rate_limit_windows.len()) as u64)
    }

    async fn get_quota_state(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<QuotaState>, StoreError> {
        Ok(self.quota_states.get(&(user_id, period_start)).map(|e| e.clone()))
    }

    async fn consume_quota(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
        delta_requests: u64,
        delta_compute: u64,
        delta_bytes: u64,
    ) -> Result<QuotaState, StoreError> {
        let mut entry = self.quota_states.entry((user_id, period_start)).or_insert_with(|| QuotaState {
            user_id,
            period_start,
            request_count: 0,
            compute_units: 0,
            bytes_used: 0,
            last_updated: Utc::now(),
        });
        entry.request_count += delta_requests;
        entry.compute_units += delta_compute;
        entry.bytes_used += delta_bytes;
        entry.last_updated = Utc::now();
        Ok(entry.clone())
    }

    async fn sync_quota_state(&self, summary: &UsageSummary) -> Result<QuotaState, StoreError> {
        let state = QuotaState {
            user_id: summary.user_id,
            period_start: summary.period_start,
            request_count: summary.request_count,
            compute_units: summary.compute_units,
            bytes_used: summary.bytes_in + summary.bytes_out,
            last_updated: Utc::now(),
        };
        self.quota_states.insert((summary.user_id, summary.period_start), state.clone());
        Ok(state)
    }

    async fn cleanup_quota_states(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let before_count = self.quota_states.len();
        self.quota_states.retain(|_, state| state.last_updated >= before);
        #[allow(clippy::cast_possible_truncation)]
        Ok((before_count - self.quota_states.len()) as u64)
    }

    async fn insert_usage_events(&self, events: &[UsageEvent]) -> Result<(), StoreError> {
        for event in events {
            self.usage_events.insert(event.id, event.clone());
        }
        Ok(())
    }

    async fn list_usage_events_since(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        Ok(self
            .usage_events
            .iter()
            .filter(|e| e.timestamp >= since && e.timestamp < until)
            .map(|e| e.clone())
            .collect())
    }

    async fn delete_usage_events_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let before_count = self.usage_events.len();
        self.usage_events.retain(|_, event| event.timestamp >= before);
        #[allow(clippy::cast_possible_truncation)]
        Ok((before_count - self.usage_events.len()) as u64)
    }

    async fn upsert_usage_summary(&self, summary: UsageSummary) -> Result<(), StoreError> {
        self.usage_summaries.insert((summary.user_id, summary.period_start), summary);
        Ok(())
    }

    async fn get_usage_summary(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageSummary>, StoreError> {
        Ok(self.usage_summaries.get(&(user_id, period_start)).map(|e| e.clone()))
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        Ok(self.webhooks.iter().map(|e| e.clone()).collect())
    }

    async fn insert_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        self.webhook_deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn update_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        if !self.webhook_deliveries.contains_key(&delivery.id) {
            return Err(StoreError::NotFound);
        }
        self.webhook_deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn list_due_webhook_deliveries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        use apigate_core::DeliveryStatus;

        Ok(self
            .webhook_deliveries
            .iter()
            .filter(|e| match e.status {
                DeliveryStatus::Pending => true,
                DeliveryStatus::Retrying => e.next_retry.is_none_or(|retry| retry <= now),
                DeliveryStatus::Success | DeliveryStatus::Failed => false,
            })
            .map(|e| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_metering::{fixture_webhook, fixture_webhook_delivery};

    #[tokio::test]
    async fn rate_limit_conformance_suite_passes() {
        let store = MemoryMeteringStore::new();
        apigate_metering::run_rate_limit_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn quota_conformance_suite_passes() {
        let store = MemoryMeteringStore::new();
        apigate_metering::run_quota_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn usage_log_conformance_suite_passes() {
        let store = MemoryMeteringStore::new();
        apigate_metering::run_usage_log_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_conformance_suite_passes() {
        let store = MemoryMeteringStore::new();
        apigate_metering::run_webhook_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn registered_webhooks_are_listed() {
        let store = MemoryMeteringStore::new();
        let hook = fixture_webhook(None, &[apigate_core::EventType::KeyCreated]);
        store.insert_webhook(hook.clone());
        let listed = store.list_webhooks().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, hook.id);
    }

    #[tokio::test]
    async fn cleanup_rate_limit_windows_removes_elapsed() {
        let store = MemoryMeteringStore::new();
        let now = Utc::now();
        let key_id = Uuid::new_v4();
        let mut window = apigate_metering::fixture_rate_limit_window(key_id, now);
        window.window_end = now - chrono::Duration::minutes(5);
        store.put_rate_limit_window(window).await.unwrap();

        let removed = store.cleanup_rate_limit_windows(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_rate_limit_window(key_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_webhook_delivery_requires_existing_row() {
        let store = MemoryMeteringStore::new();
        let delivery = fixture_webhook_delivery(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let result = store.update_webhook_delivery(delivery).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
