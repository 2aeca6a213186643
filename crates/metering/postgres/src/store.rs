use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use apigate_core::{
    DeliveryStatus, EventType, MeteringStore, QuotaState, RateLimitWindowState, StoreError,
    UsageEvent, UsageSummary, Webhook, WebhookDelivery,
};

use crate::config::PostgresConfig;

/// `PostgreSQL`-backed [`MeteringStore`].
pub struct PostgresMeteringStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresMeteringStore {
    /// # Errors
    /// Returns [`StoreError::Backend`] if the connection pool can't be built
    /// or bootstrap migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        crate::migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn with_pool(pool: PgPool, config: Arc<PostgresConfig>) -> Self {
        Self { pool, config }
    }

    /// Register a webhook so it's returned by `list_webhooks`. Webhook
    /// registration itself is a control-plane concern outside `MeteringStore`.
    ///
    /// # Errors
    /// Returns [`StoreError::Backend`] if the insert fails.
    pub async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), StoreError> {
        use secrecy::ExposeSecret;

        let events: Vec<&str> = webhook.events.iter().copied().map(event_type_str).collect();
        sqlx::query(&format!(
            "INSERT INTO {} (id, user_id, url, secret, events, retry_count, timeout_ms, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO NOTHING",
            self.config.webhooks_table()
        ))
        .bind(webhook.id)
        .bind(webhook.user_id)
        .bind(&webhook.url)
        .bind(webhook.secret.expose_secret())
        .bind(&events)
        .bind(i32::try_from(webhook.retry_count).unwrap_or(i32::MAX))
        .bind(i64::try_from(webhook.timeout_ms).unwrap_or(i64::MAX))
        .bind(webhook.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

fn delivery_status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Retrying => "retrying",
        DeliveryStatus::Success => "success",
        DeliveryStatus::Failed => "failed",
    }
}

fn parse_delivery_status(raw: &str) -> DeliveryStatus {
    match raw {
        "retrying" => DeliveryStatus::Retrying,
        "success" => DeliveryStatus::Success,
        "failed" => DeliveryStatus::Failed,
        _ => DeliveryStatus::Pending,
    }
}

fn event_type_str(event_type: EventType) -> &'static str {
    match event_type {
        EventType::KeyCreated => "key_created",
        EventType::KeyRevoked => "key_revoked",
        EventType::RouteCreated => "route_created",
        EventType::RouteUpdated => "route_updated",
        EventType::RouteDeleted => "route_deleted",
        EventType::UpstreamCreated => "upstream_created",
        EventType::UpstreamUpdated => "upstream_updated",
        EventType::UpstreamDeleted => "upstream_deleted",
        EventType::PlanChanged => "plan_changed",
        EventType::UsageThreshold => "usage_threshold",
        EventType::UsageLimit => "usage_limit",
    }
}

fn parse_event_type(raw: &str) -> EventType {
    match raw {
        "key_revoked" => EventType::KeyRevoked,
        "route_created" => EventType::RouteCreated,
        "route_updated" => EventType::RouteUpdated,
        "route_deleted" => EventType::RouteDeleted,
        "upstream_created" => EventType::UpstreamCreated,
        "upstream_updated" => EventType::UpstreamUpdated,
        "upstream_deleted" => EventType::UpstreamDeleted,
        "plan_changed" => EventType::PlanChanged,
        "usage_threshold" => EventType::UsageThreshold,
        "usage_limit" => EventType::UsageLimit,
        _ => EventType::KeyCreated,
    }
}

fn row_to_webhook_delivery(row: sqlx::postgres::PgRow) -> WebhookDelivery {
    #[allow(clippy::cast_sign_loss)]
    let attempt = row.get::<i32, _>("attempt") as u32;
    #[allow(clippy::cast_sign_loss)]
    let max_attempts = row.get::<i32, _>("max_attempts") as u32;
    #[allow(clippy::cast_sign_loss)]
    let status_code = row.get::<Option<i32>, _>("status_code").map(|v| v as u16);
    #[allow(clippy::cast_sign_loss)]
    let duration_ms = row.get::<Option<i64>, _>("duration_ms").map(|v| v as u64);

    WebhookDelivery {
        id: row.get("id"),
        webhook_id: row.get("webhook_id"),
        event_id: row.get("event_id"),
        event_type: parse_event_type(row.get("event_type")),
        payload: row.get("payload"),
        status: parse_delivery_status(row.get("status")),
        attempt,
        max_attempts,
        status_code,
        response_body: row.get("response_body"),
        error: row.get("error"),
        duration_ms,
        next_retry: row.get("next_retry"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl MeteringStore for PostgresMeteringStore {
    async fn get_rate_limit_window(
        &self,
        key_id: Uuid,
    ) -> Result<Option<RateLimitWindowState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT key_id, count, window_end, burst_used FROM {} WHERE key_id = $1",
            self.config.rate_limit_windows_table()
        ))
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(|row| {
            #[allow(clippy::cast_sign_loss)]
            let count = row.get::<i32, _>("count") as u32;
            #[allow(clippy::cast_sign_loss)]
            let burst_used = row.get::<i32, _>("burst_used") as u32;
            RateLimitWindowState {
                key_id: row.get("key_id"),
                count,
                window_end: row.get("window_end"),
                burst_used,
            }
        }))
    }

    async fn put_rate_limit_window(&self, state: RateLimitWindowState) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {} (key_id, count, window_end, burst_used) VALUES ($1, $2, $3, $4)
             ON CONFLICT (key_id) DO UPDATE SET count = EXCLUDED.count,
                window_end = EXCLUDED.window_end, burst_used = EXCLUDED.burst_used",
            self.config.rate_limit_windows_table()
        ))
        .bind(state.key_id)
        .bind(i32::try_from(state.count).unwrap_or(i32::MAX))
        .bind(state.window_end)
        .bind(i32::try_from(state.burst_used).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn cleanup_rate_limit_windows(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE window_end < $1",
            self.config.rate_limit_windows_table()
        ))
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn get_quota_state(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<QuotaState>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT user_id, period_start, request_count, compute_units, bytes_used, last_updated
             FROM {} WHERE user_id = $1 AND period_start = $2",
            self.config.quota_states_table()
        ))
        .bind(user_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(row_to_quota_state))
    }

    async fn consume_quota(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
        delta_requests: u64,
        delta_compute: u64,
        delta_bytes: u64,
    ) -> Result<QuotaState, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO {table} (user_id, period_start, request_count, compute_units, bytes_used, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, period_start) DO UPDATE SET
                request_count = {table}.request_count + EXCLUDED.request_count,
                compute_units = {table}.compute_units + EXCLUDED.compute_units,
                bytes_used = {table}.bytes_used + EXCLUDED.bytes_used,
                last_updated = EXCLUDED.last_updated
             RETURNING user_id, period_start, request_count, compute_units, bytes_used, last_updated",
            table = self.config.quota_states_table()
        ))
        .bind(user_id)
        .bind(period_start)
        .bind(i64::try_from(delta_requests).unwrap_or(i64::MAX))
        .bind(i64::try_from(delta_compute).unwrap_or(i64::MAX))
        .bind(i64::try_from(delta_bytes).unwrap_or(i64::MAX))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row_to_quota_state(row))
    }

    async fn sync_quota_state(&self, summary: &UsageSummary) -> Result<QuotaState, StoreError> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO {table} (user_id, period_start, request_count, compute_units, bytes_used, last_updated)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (user_id, period_start) DO UPDATE SET
                request_count = EXCLUDED.request_count,
                compute_units = EXCLUDED.compute_units,
                bytes_used = EXCLUDED.bytes_used,
                last_updated = EXCLUDED.last_updated
             RETURNING user_id, period_start, request_count, compute_units, bytes_used, last_updated",
            table = self.config.quota_states_table()
        ))
        .bind(summary.user_id)
        .bind(summary.period_start)
        .bind(i64::try_from(summary.request_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.compute_units).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.bytes_in + summary.bytes_out).unwrap_or(i64::MAX))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row_to_quota_state(row))
    }

    async fn cleanup_quota_states(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE last_updated < $1",
            self.config.quota_states_table()
        ))
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn insert_usage_events(&self, events: &[UsageEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        let table = self.config.usage_events_table();
        for event in events {
            sqlx::query(&format!(
                "INSERT INTO {table} (id, key_id, user_id, method, path, status_code, latency_ms,
                        request_bytes, response_bytes, cost_multiplier, ip_address, user_agent, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                 ON CONFLICT (id) DO NOTHING"
            ))
            .bind(event.id)
            .bind(event.key_id)
            .bind(event.user_id)
            .bind(&event.method)
            .bind(&event.path)
            .bind(i32::from(event.status_code))
            .bind(i64::try_from(event.latency_ms).unwrap_or(i64::MAX))
            .bind(i64::try_from(event.request_bytes).unwrap_or(i64::MAX))
            .bind(i64::try_from(event.response_bytes).unwrap_or(i64::MAX))
            .bind(event.cost_multiplier)
            .bind(&event.ip_address)
            .bind(&event.user_agent)
            .bind(event.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list_usage_events_since(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, key_id, user_id, method, path, status_code, latency_ms, request_bytes,
                    response_bytes, cost_multiplier, ip_address, user_agent, timestamp
             FROM {} WHERE timestamp >= $1 AND timestamp < $2",
            self.config.usage_events_table()
        ))
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_usage_event).collect())
    }

    async fn delete_usage_events_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE timestamp < $1",
            self.config.usage_events_table()
        ))
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn upsert_usage_summary(&self, summary: UsageSummary) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {table} (user_id, period_start, period_end, request_count, compute_units,
                    bytes_in, bytes_out, error_count, avg_latency_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (user_id, period_start) DO UPDATE SET
                period_end = EXCLUDED.period_end,
                request_count = EXCLUDED.request_count,
                compute_units = EXCLUDED.compute_units,
                bytes_in = EXCLUDED.bytes_in,
                bytes_out = EXCLUDED.bytes_out,
                error_count = EXCLUDED.error_count,
                avg_latency_ms = EXCLUDED.avg_latency_ms",
            table = self.config.usage_summaries_table()
        ))
        .bind(summary.user_id)
        .bind(summary.period_start)
        .bind(summary.period_end)
        .bind(i64::try_from(summary.request_count).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.compute_units).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.bytes_in).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.bytes_out).unwrap_or(i64::MAX))
        .bind(i64::try_from(summary.error_count).unwrap_or(i64::MAX))
        .bind(summary.avg_latency_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_usage_summary(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageSummary>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT user_id, period_start, period_end, request_count, compute_units, bytes_in,
                    bytes_out, error_count, avg_latency_ms
             FROM {} WHERE user_id = $1 AND period_start = $2",
            self.config.usage_summaries_table()
        ))
        .bind(user_id)
        .bind(period_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(row_to_usage_summary))
    }

    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, user_id, url, secret, events, retry_count, timeout_ms, enabled FROM {}",
            self.config.webhooks_table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_webhook).collect())
    }

    async fn insert_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, webhook_id, event_id, event_type, payload, status, attempt,
                    max_attempts, status_code, response_body, error, duration_ms, next_retry,
                    created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             ON CONFLICT (id) DO NOTHING",
            self.config.webhook_deliveries_table()
        ))
        .bind(delivery.id)
        .bind(delivery.webhook_id)
        .bind(delivery.event_id)
        .bind(event_type_str(delivery.event_type))
        .bind(&delivery.payload)
        .bind(delivery_status_str(delivery.status))
        .bind(i32::try_from(delivery.attempt).unwrap_or(i32::MAX))
        .bind(i32::try_from(delivery.max_attempts).unwrap_or(i32::MAX))
        .bind(delivery.status_code.map(i32::from))
        .bind(&delivery.response_body)
        .bind(&delivery.error)
        .bind(delivery.duration_ms.and_then(|v| i64::try_from(v).ok()))
        .bind(delivery.next_retry)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn update_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = $2, attempt = $3, status_code = $4, response_body = $5,
                    error = $6, duration_ms = $7, next_retry = $8, updated_at = $9
             WHERE id = $1",
            self.config.webhook_deliveries_table()
        ))
        .bind(delivery.id)
        .bind(delivery_status_str(delivery.status))
        .bind(i32::try_from(delivery.attempt).unwrap_or(i32::MAX))
        .bind(delivery.status_code.map(i32::from))
        .bind(&delivery.response_body)
        .bind(&delivery.error)
        .bind(delivery.duration_ms.and_then(|v| i64::try_from(v).ok()))
        .bind(delivery.next_retry)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list_due_webhook_deliveries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, webhook_id, event_id, event_type, payload, status, attempt, max_attempts,
                    status_code, response_body, error, duration_ms, next_retry, created_at, updated_at
             FROM {}
             WHERE status = 'pending' OR (status = 'retrying' AND next_retry <= $1)",
            self.config.webhook_deliveries_table()
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_webhook_delivery).collect())
    }
}

fn row_to_quota_state(row: sqlx::postgres::PgRow) -> QuotaState {
    #[allow(clippy::cast_sign_loss)]
    let request_count = row.get::<i64, _>("request_count") as u64;
    #[allow(clippy::cast_sign_loss)]
    let compute_units = row.get::<i64, _>("compute_units") as u64;
    #[allow(clippy::cast_sign_loss)]
    let bytes_used = row.get::<i64, _>("bytes_used") as u64;

    QuotaState {
        user_id: row.get("user_id"),
        period_start: row.get("period_start"),
        request_count,
        compute_units,
        bytes_used,
        last_updated: row.get("last_updated"),
    }
}

fn row_to_usage_event(row: sqlx::postgres::PgRow) -> UsageEvent {
    #[allow(clippy::cast_sign_loss)]
    let status_code = row.get::<i32, _>("status_code") as u16;
    #[allow(clippy::cast_sign_loss)]
    let latency_ms = row.get::<i64, _>("latency_ms") as u64;
    #[allow(clippy::cast_sign_loss)]
    let request_bytes = row.get::<i64, _>("request_bytes") as u64;
    #[allow(clippy::cast_sign_loss)]
    let response_bytes = row.get::<i64, _>("response_bytes") as u64;

    UsageEvent {
        id: row.get("id"),
        key_id: row.get("key_id"),
        user_id: row.get("user_id"),
        method: row.get("method"),
        path: row.get("path"),
        status_code,
        latency_ms,
        request_bytes,
        response_bytes,
        cost_multiplier: row.get("cost_multiplier"),
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        timestamp: row.get("timestamp"),
    }
}

fn row_to_usage_summary(row: sqlx::postgres::PgRow) -> UsageSummary {
    #[allow(clippy::cast_sign_loss)]
    let request_count = row.get::<i64, _>("request_count") as u64;
    #[allow(clippy::cast_sign_loss)]
    let compute_units = row.get::<i64, _>("compute_units") as u64;
    #[allow(clippy::cast_sign_loss)]
    let bytes_in = row.get::<i64, _>("bytes_in") as u64;
    #[allow(clippy::cast_sign_loss)]
    let bytes_out = row.get::<i64, _>("bytes_out") as u64;
    #[allow(clippy::cast_sign_loss)]
    let error_count = row.get::<i64, _>("error_count") as u64;

    UsageSummary {
        user_id: row.get("user_id"),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        request_count,
        compute_units,
        bytes_in,
        bytes_out,
        error_count,
        avg_latency_ms: row.get("avg_latency_ms"),
    }
}

fn row_to_webhook(row: sqlx::postgres::PgRow) -> Webhook {
    #[allow(clippy::cast_sign_loss)]
    let retry_count = row.get::<i32, _>("retry_count") as u32;
    #[allow(clippy::cast_sign_loss)]
    let timeout_ms = row.get::<i64, _>("timeout_ms") as u64;

    Webhook {
        id: row.get("id"),
        user_id: row.get("user_id"),
        url: row.get("url"),
        secret: SecretString::from(row.get::<String, _>("secret")),
        events: row
            .get::<Vec<String>, _>("events")
            .iter()
            .map(|s| parse_event_type(s))
            .collect(),
        retry_count,
        timeout_ms,
        enabled: row.get("enabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_round_trips() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(parse_delivery_status(delivery_status_str(status)), status);
        }
    }

    #[test]
    fn event_type_round_trips() {
        for event_type in [
            EventType::KeyCreated,
            EventType::KeyRevoked,
            EventType::RouteCreated,
            EventType::RouteUpdated,
            EventType::RouteDeleted,
            EventType::UpstreamCreated,
            EventType::UpstreamUpdated,
            EventType::UpstreamDeleted,
            EventType::PlanChanged,
            EventType::UsageThreshold,
            EventType::UsageLimit,
        ] {
            assert_eq!(parse_event_type(event_type_str(event_type)), event_type);
        }
    }
}
