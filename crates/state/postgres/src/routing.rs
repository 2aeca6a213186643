use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use apigate_core::{
    AuthType, HeaderMatch, HostMatchType, MeteringMode, PathMatchType, Route, RoutingStore,
    StoreError, Transform, Upstream,
};

use crate::config::PostgresConfig;

/// `PostgreSQL`-backed [`RoutingStore`].
pub struct PostgresRoutingStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresRoutingStore {
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
}

fn host_match_type_str(t: HostMatchType) -> &'static str {
    match t {
        HostMatchType::Exact => "exact",
        HostMatchType::Suffix => "suffix",
        HostMatchType::Wildcard => "wildcard",
        HostMatchType::Any => "any",
    }
}

fn parse_host_match_type(raw: &str) -> HostMatchType {
    match raw {
        "suffix" => HostMatchType::Suffix,
        "wildcard" => HostMatchType::Wildcard,
        "any" => HostMatchType::Any,
        _ => HostMatchType::Exact,
    }
}

fn parse_path_match_type(raw: &str) -> PathMatchType {
    match raw {
        "prefix" => PathMatchType::Prefix,
        "regex" => PathMatchType::Regex,
        _ => PathMatchType::Exact,
    }
}

fn parse_metering_mode(raw: &str) -> MeteringMode {
    match raw {
        "expression" => MeteringMode::Expression,
        _ => MeteringMode::Fixed,
    }
}

fn parse_auth_type(raw: &str) -> AuthType {
    match raw {
        "bearer" => AuthType::Bearer,
        "header" => AuthType::Header,
        "basic" => AuthType::Basic,
        _ => AuthType::None,
    }
}

fn row_to_route(row: sqlx::postgres::PgRow) -> Result<Route, StoreError> {
    let headers: serde_json::Value = row.get("headers");
    let headers: Vec<HeaderMatch> =
        serde_json::from_value(headers).map_err(|e| StoreError::Backend(e.to_string()))?;

    let request_transform: Option<serde_json::Value> = row.get("request_transform");
    let request_transform: Option<Transform> = request_transform
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    let response_transform: Option<serde_json::Value> = row.get("response_transform");
    let response_transform: Option<Transform> = response_transform
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    Ok(Route {
        id: row.get("id"),
        name: row.get("name"),
        host_pattern: row.get("host_pattern"),
        host_match_type: parse_host_match_type(row.get("host_match_type")),
        path_pattern: row.get("path_pattern"),
        match_type: parse_path_match_type(row.get("match_type")),
        methods: row.get::<Vec<String>, _>("methods").into_iter().collect(),
        headers,
        upstream_id: row.get("upstream_id"),
        path_rewrite: row.get("path_rewrite"),
        method_override: row.get("method_override"),
        request_transform,
        response_transform,
        metering_expr: row.get("metering_expr"),
        metering_mode: parse_metering_mode(row.get("metering_mode")),
        priority: row.get("priority"),
        auth_required: row.get("auth_required"),
        enabled: row.get("enabled"),
    })
}

fn row_to_upstream(row: sqlx::postgres::PgRow) -> Upstream {
    #[allow(clippy::cast_sign_loss)]
    let timeout_ms = row.get::<i64, _>("timeout_ms") as u64;
    #[allow(clippy::cast_sign_loss)]
    let idle_conn_timeout_ms = row.get::<i64, _>("idle_conn_timeout_ms") as u64;
    #[allow(clippy::cast_sign_loss)]
    let max_idle_conns = row.get::<i32, _>("max_idle_conns") as u32;

    Upstream {
        id: row.get("id"),
        name: row.get("name"),
        base_url: row.get("base_url"),
        timeout: std::time::Duration::from_millis(timeout_ms),
        max_idle_conns,
        idle_conn_timeout: std::time::Duration::from_millis(idle_conn_timeout_ms),
        auth_type: parse_auth_type(row.get("auth_type")),
        auth_header: row.get("auth_header"),
        auth_value: SecretString::from(row.get::<String, _>("auth_value")),
        enabled: row.get("enabled"),
    }
}

#[async_trait]
impl RoutingStore for PostgresRoutingStore {
    async fn list_enabled_routes(&self) -> Result<Vec<Route>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, name, host_pattern, host_match_type, path_pattern, match_type, methods,
                    headers, upstream_id, path_rewrite, method_override, request_transform,
                    response_transform, metering_expr, metering_mode, priority, auth_required, enabled
             FROM {}
             WHERE enabled
             ORDER BY priority DESC, name ASC",
            self.config.routes_table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        rows.into_iter().map(row_to_route).collect()
    }

    async fn get_upstream(&self, id: Uuid) -> Result<Upstream, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, name, base_url, timeout_ms, max_idle_conns, idle_conn_timeout_ms,
                    auth_type, auth_header, auth_value, enabled
             FROM {} WHERE id = $1",
            self.config.upstreams_table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound)?;

        Ok(row_to_upstream(row))
    }

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, name, base_url, timeout_ms, max_idle_conns, idle_conn_timeout_ms,
                    auth_type, auth_header, auth_value, enabled
             FROM {}",
            self.config.upstreams_table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_upstream).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_type_round_trips() {
        for t in [HostMatchType::Exact, HostMatchType::Suffix, HostMatchType::Wildcard, HostMatchType::Any] {
            assert_eq!(parse_host_match_type(host_match_type_str(t)), t);
        }
    }

    #[test]
    fn unknown_metering_mode_defaults_to_fixed() {
        assert_eq!(parse_metering_mode("garbage"), MeteringMode::Fixed);
    }

    #[test]
    fn unknown_auth_type_defaults_to_none() {
        assert_eq!(parse_auth_type("garbage"), AuthType::None);
    }
}
