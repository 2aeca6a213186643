//! Conformance test suite shared by every `MeteringStore` backend
//! (`apigate-metering-memory`, `apigate-metering-postgres`).
//!
//! Mirrors `apigate-state`'s split: fixtures plus one assertion function per
//! concern (rate limiting, quota, usage log/summaries, webhook deliveries),
//! so every backend is held to the exact same contract.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use uuid::Uuid;

use apigate_core::{
    DeliveryStatus, EventType, MeteringStore, QuotaState, RateLimitWindowState, StoreError,
    UsageEvent, UsageSummary, Webhook, WebhookDelivery,
};

#[must_use]
pub fn fixture_rate_limit_window(key_id: Uuid, now: DateTime<Utc>) -> RateLimitWindowState {
    RateLimitWindowState {
        key_id,
        count: 1,
        window_end: now + chrono::Duration::seconds(60),
        burst_used: 0,
    }
}

#[must_use]
pub fn fixture_quota_state(user_id: Uuid, period_start: DateTime<Utc>) -> QuotaState {
    QuotaState {
        user_id,
        period_start,
        request_count: 0,
        compute_units: 0,
        bytes_used: 0,
        last_updated: Utc::now(),
    }
}

#[must_use]
pub fn fixture_usage_event(key_id: Uuid, user_id: Uuid, timestamp: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        id: Uuid::new_v4(),
        key_id,
        user_id,
        method: "GET".to_owned(),
        path: "/v1/items".to_owned(),
        status_code: 200,
        latency_ms: 12,
        request_bytes: 128,
        response_bytes: 512,
        cost_multiplier: 1.0,
        ip_address: None,
        user_agent: None,
        timestamp,
    }
}

#[must_use]
pub fn fixture_usage_summary(
    user_id: Uuid,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> UsageSummary {
    UsageSummary {
        user_id,
        period_start,
        period_end,
        request_count: 10,
        compute_units: 10,
        bytes_in: 1_024,
        bytes_out: 4_096,
        error_count: 0,
        avg_latency_ms: 15.0,
    }
}

#[must_use]
pub fn fixture_webhook(user_id: Option<Uuid>, events: &[EventType]) -> Webhook {
    Webhook {
        id: Uuid::new_v4(),
        user_id,
        url: "https://example.com/hook".to_owned(),
        secret: SecretString::from("whsec_test".to_owned()),
        events: events.iter().copied().collect::<HashSet<_>>(),
        retry_count: 3,
        timeout_ms: 5_000,
        enabled: true,
    }
}

#[must_use]
pub fn fixture_webhook_delivery(webhook_id: Uuid, event_id: Uuid, now: DateTime<Utc>) -> WebhookDelivery {
    WebhookDelivery {
        id: Uuid::new_v4(),
        webhook_id,
        event_id,
        event_type: EventType::KeyCreated,
        payload: serde_json::json!({"hello": "world"}),
        status: DeliveryStatus::Pending,
        attempt: 0,
        max_attempts: 3,
        status_code: None,
        response_body: None,
        error: None,
        duration_ms: None,
        next_retry: None,
        created_at: now,
        updated_at: now,
    }
}

/// # Errors
/// Returns the first [`StoreError`] a sub-assertion encounters.
pub async fn run_rate_limit_conformance(store: &dyn MeteringStore) -> Result<(), StoreError> {
    let key_id = Uuid::new_v4();
    let now = Utc::now();

    assert!(store.get_rate_limit_window(key_id).await?.is_none());

    let window = fixture_rate_limit_window(key_id, now);
    store.put_rate_limit_window(window.clone()).await?;

    let loaded = store.get_rate_limit_window(key_id).await?.expect("window was just written");
    assert_eq!(loaded.key_id, key_id);
    assert_eq!(loaded.count, window.count);

    let mut bumped = loaded;
    bumped.count += 1;
    store.put_rate_limit_window(bumped.clone()).await?;
    let reloaded = store.get_rate_limit_window(key_id).await?.unwrap();
    assert_eq!(reloaded.count, bumped.count);

    Ok(())
}

/// # Errors
/// Returns the first [`StoreError`] a sub-assertion encounters.
pub async fn run_quota_conformance(store: &dyn MeteringStore) -> Result<(), StoreError> {
    let user_id = Uuid::new_v4();
    let period_start = Utc::now();

    assert!(store.get_quota_state(user_id, period_start).await?.is_none());

    let after = store.consume_quota(user_id, period_start, 1, 2, 100).await?;
    assert_eq!(after.request_count, 1);
    assert_eq!(after.compute_units, 2);
    assert_eq!(after.bytes_used, 100);

    let after2 = store.consume_quota(user_id, period_start, 1, 2, 100).await?;
    assert_eq!(after2.request_count, 2);
    assert_eq!(after2.compute_units, 4);
    assert_eq!(after2.bytes_used, 200);

    let summary = fixture_usage_summary(user_id, period_start, period_start + chrono::Duration::days(30));
    let synced = store.sync_quota_state(&summary).await?;
    assert_eq!(synced.request_count, summary.request_count);

    Ok(())
}

/// # Errors
/// Returns the first [`StoreError`] a sub-assertion encounters.
pub async fn run_usage_log_conformance(store: &dyn MeteringStore) -> Result<(), StoreError> {
    let key_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let now = Utc::now();

    let events = vec![
        fixture_usage_event(key_id, user_id, now - chrono::Duration::minutes(1)),
        fixture_usage_event(key_id, user_id, now),
    ];
    store.insert_usage_events(&events).await?;

    let listed = store
        .list_usage_events_since(now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(5))
        .await?;
    assert!(listed.len() >= 2);

    let period_start = now - chrono::Duration::days(1);
    let period_end = now + chrono::Duration::days(1);
    assert!(store.get_usage_summary(user_id, period_start).await?.is_none());

    let summary = fixture_usage_summary(user_id, period_start, period_end);
    store.upsert_usage_summary(summary.clone()).await?;
    let loaded = store.get_usage_summary(user_id, period_start).await?.expect("summary was just written");
    assert_eq!(loaded.request_count, summary.request_count);

    Ok(())
}

/// # Errors
/// Returns the first [`StoreError`] a sub-assertion encounters.
pub async fn run_webhook_conformance(store: &dyn MeteringStore) -> Result<(), StoreError> {
    let now = Utc::now();
    let webhook_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();

    let delivery = fixture_webhook_delivery(webhook_id, event_id, now);
    store.insert_webhook_delivery(delivery.clone()).await?;

    let due = store.list_due_webhook_deliveries(now + chrono::Duration::seconds(1)).await?;
    assert!(due.iter().any(|d| d.id == delivery.id));

    let mut retried = delivery;
    retried.status = DeliveryStatus::Retrying;
    retried.attempt = 1;
    retried.next_retry = Some(now + chrono::Duration::minutes(1));
    store.update_webhook_delivery(retried.clone()).await?;

    let not_yet_due = store.list_due_webhook_deliveries(now).await?;
    assert!(!not_yet_due.iter().any(|d| d.id == retried.id));

    let due_after_backoff = store
        .list_due_webhook_deliveries(now + chrono::Duration::minutes(2))
        .await?;
    assert!(due_after_backoff.iter().any(|d| d.id == retried.id));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_construct_without_panicking() {
        let now = Utc::now();
        let key_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let _ = fixture_rate_limit_window(key_id, now);
        let _ = fixture_quota_state(user_id, now);
        let _ = fixture_usage_event(key_id, user_id, now);
        let _ = fixture_usage_summary(user_id, now, now);
        let _ = fixture_webhook(None, &[EventType::KeyCreated]);
        let _ = fixture_webhook_delivery(Uuid::new_v4(), Uuid::new_v4(), now);
    }
}
