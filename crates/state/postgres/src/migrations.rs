use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Create the principal/routing tables if they don't already exist.
///
/// SQL migration mechanics beyond this bootstrap DDL (versioning, rollback
/// tooling) are out of scope.
///
/// # Errors
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let plans = config.plans_table();
    let users = config.users_table();
    let keys = config.keys_table();
    let routes = config.routes_table();
    let upstreams = config.upstreams_table();

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {plans} (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            rate_limit_per_minute INT NOT NULL,
            requests_per_month BIGINT NOT NULL,
            price_monthly DOUBLE PRECISION NOT NULL,
            overage_price DOUBLE PRECISION NOT NULL,
            meter_type TEXT NOT NULL,
            estimated_cost_per_req DOUBLE PRECISION NOT NULL,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {}_single_default_idx ON {plans} ((1)) WHERE is_default",
        config.schema
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {users} (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            plan_id UUID NOT NULL REFERENCES {plans}(id),
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {keys} (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES {users}(id),
            hash TEXT NOT NULL,
            prefix TEXT NOT NULL,
            name TEXT NOT NULL,
            scopes TEXT[] NOT NULL DEFAULT '{{}}',
            expires_at TIMESTAMPTZ,
            revoked_at TIMESTAMPTZ,
            last_used TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}_keys_prefix_idx ON {keys} (prefix)",
        config.schema
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {upstreams} (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            base_url TEXT NOT NULL,
            timeout_ms BIGINT NOT NULL,
            max_idle_conns INT NOT NULL,
            idle_conn_timeout_ms BIGINT NOT NULL,
            auth_type TEXT NOT NULL,
            auth_header TEXT,
            auth_value TEXT NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {routes} (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            host_pattern TEXT NOT NULL,
            host_match_type TEXT NOT NULL,
            path_pattern TEXT NOT NULL,
            match_type TEXT NOT NULL,
            methods TEXT[] NOT NULL DEFAULT '{{}}',
            headers JSONB NOT NULL DEFAULT '[]',
            upstream_id UUID NOT NULL REFERENCES {upstreams}(id),
            path_rewrite TEXT,
            method_override TEXT,
            request_transform JSONB,
            response_transform JSONB,
            metering_expr TEXT NOT NULL DEFAULT '',
            metering_mode TEXT NOT NULL,
            priority INT NOT NULL DEFAULT 0,
            auth_required BOOLEAN NOT NULL DEFAULT TRUE,
            enabled BOOLEAN NOT NULL DEFAULT TRUE
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {}_routes_enabled_idx ON {routes} (priority DESC, name ASC) WHERE enabled",
        config.schema
    ))
    .execute(pool)
    .await?;

    Ok(())
}
