use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Create the metering tables if they don't already exist.
///
/// SQL migration mechanics beyond this bootstrap DDL (versioning, rollback
/// tooling) are out of scope.
///
/// # Errors
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let rate_limit_windows = config.rate_limit_windows_table();
    let quota_states = config.quota_states_table();
    let usage_events = config.usage_events_table();
    let usage_summaries = config.usage_summaries_table();
    let webhooks = config.webhooks_table();
    let webhook_deliveries = config.webhook_deliveries_table();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {rate_limit_windows} (
            key_id UUID PRIMARY KEY,
            count INT NOT NULL,
            window_end TIMESTAMPTZ NOT NULL,
            burst_used INT NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}_rlw_window_end_idx ON {rate_limit_windows} (window_end)",
        config.schema
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {quota_states} (
            user_id UUID NOT NULL,
            period_start TIMESTAMPTZ NOT NULL,
            request_count BIGINT NOT NULL DEFAULT 0,
            compute_units BIGINT NOT NULL DEFAULT 0,
            bytes_used BIGINT NOT NULL DEFAULT 0,
            last_updated TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (user_id, period_start)
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {usage_events} (
            id UUID PRIMARY KEY,
            key_id UUID NOT NULL,
            user_id UUID NOT NULL,
            method TEXT NOT NULL,
            path TEXT NOT NULL,
            status_code INT NOT NULL,
            latency_ms BIGINT NOT NULL,
            request_bytes BIGINT NOT NULL,
            response_bytes BIGINT NOT NULL,
            cost_multiplier DOUBLE PRECISION NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            timestamp TIMESTAMPTZ NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}_usage_events_ts_idx ON {usage_events} (timestamp)",
        config.schema
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {usage_summaries} (
            user_id UUID NOT NULL,
            period_start TIMESTAMPTZ NOT NULL,
            period_end TIMESTAMPTZ NOT NULL,
            request_count BIGINT NOT NULL,
            compute_units BIGINT NOT NULL,
            bytes_in BIGINT NOT NULL,
            bytes_out BIGINT NOT NULL,
            error_count BIGINT NOT NULL,
            avg_latency_ms DOUBLE PRECISION NOT NULL,
            PRIMARY KEY (user_id, period_start)
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {webhooks} (
            id UUID PRIMARY KEY,
            user_id UUID,
            url TEXT NOT NULL,
            secret TEXT NOT NULL,
            events TEXT[] NOT NULL DEFAULT '{{}}',
            retry_count INT NOT NULL,
            timeout_ms BIGINT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {webhook_deliveries} (
            id UUID PRIMARY KEY,
            webhook_id UUID NOT NULL,
            event_id UUID NOT NULL,
            event_type TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL,
            attempt INT NOT NULL,
            max_attempts INT NOT NULL,
            status_code INT,
            response_body TEXT,
            error TEXT,
            duration_ms BIGINT,
            next_retry TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}_webhook_deliveries_due_idx
         ON {webhook_deliveries} (status, next_retry)",
        config.schema
    ))
    .execute(pool)
    .await?;

    Ok(())
}
