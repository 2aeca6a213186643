//! `PostgreSQL`-backed `PrincipalStore`/`RoutingStore` binding. Durable,
//! multi-replica counterpart to `apigate-state-memory`.

mod config;
mod migrations;
mod principal;
mod routing;

pub use config::PostgresConfig;
pub use principal::PostgresPrincipalStore;
pub use routing::PostgresRoutingStore;

use std::sync::Arc;

use apigate_core::StoreError;

/// Build a principal store and a routing store sharing a single connection
/// pool and running migrations exactly once.
///
/// # Errors
/// Returns [`StoreError::Backend`] if the pool can't be built or migrations
/// fail.
pub async fn connect(
    config: PostgresConfig,
) -> Result<(PostgresPrincipalStore, PostgresRoutingStore), StoreError> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect(&config.url)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    migrations::run_migrations(&pool, &config)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

    let config = Arc::new(config);
    let principal = PostgresPrincipalStore::with_pool(pool.clone(), config.clone());
    let routing = PostgresRoutingStore::with_pool(pool, config);

    Ok((principal, routing))
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use apigate_core::{MeterType, PrincipalStore, RoutingStore};
    use apigate_state::{fixture_plan, fixture_route, fixture_upstream};

    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("APIGATE_TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/apigate_test".to_owned()),
            pool_size: 5,
            schema: "public".to_owned(),
        }
    }

    /// Seeds a single default plan directly via SQL, since `PrincipalStore`
    /// is read-only by design (writes are an operator/control-plane concern
    /// outside this crate's port).
    async fn seed_default_plan(pool: &sqlx::PgPool, config: &PostgresConfig) {
        let plan = fixture_plan(true);
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, rate_limit_per_minute, requests_per_month, price_monthly,
                    overage_price, meter_type, estimated_cost_per_req, is_default, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, true, true)
             ON CONFLICT (id) DO NOTHING",
            config.plans_table()
        ))
        .bind(plan.id)
        .bind(&plan.name)
        .bind(i32::try_from(plan.rate_limit_per_minute).unwrap())
        .bind(i64::try_from(plan.requests_per_month).unwrap())
        .bind(plan.price_monthly)
        .bind(plan.overage_price)
        .bind(match plan.meter_type {
            MeterType::Requests => "requests",
            MeterType::ComputeUnits => "compute_units",
            MeterType::Bytes => "bytes",
        })
        .bind(plan.estimated_cost_per_req)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn seed_upstream_and_route(pool: &sqlx::PgPool, config: &PostgresConfig) -> apigate_core::Route {
        let upstream = fixture_upstream();
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, base_url, timeout_ms, max_idle_conns, idle_conn_timeout_ms,
                    auth_type, auth_header, auth_value, enabled)
             VALUES ($1, $2, $3, $4, $5, $6, 'none', NULL, $7, true)
             ON CONFLICT (id) DO NOTHING",
            config.upstreams_table()
        ))
        .bind(upstream.id)
        .bind(&upstream.name)
        .bind(&upstream.base_url)
        .bind(i64::try_from(upstream.timeout.as_millis()).unwrap())
        .bind(i32::try_from(upstream.max_idle_conns).unwrap())
        .bind(i64::try_from(upstream.idle_conn_timeout.as_millis()).unwrap())
        .bind("")
        .execute(pool)
        .await
        .unwrap();

        let route = fixture_route(upstream.id, 5);
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, host_pattern, host_match_type, path_pattern, match_type,
                    methods, headers, upstream_id, metering_expr, metering_mode, priority,
                    auth_required, enabled)
             VALUES ($1, $2, $3, 'any', $4, 'prefix', '{{}}', '[]', $5, '', 'fixed', $6, true, true)
             ON CONFLICT (id) DO NOTHING",
            config.routes_table()
        ))
        .bind(route.id)
        .bind(&route.name)
        .bind(&route.host_pattern)
        .bind(&route.path_pattern)
        .bind(route.upstream_id)
        .bind(route.priority)
        .execute(pool)
        .await
        .unwrap();

        route
    }

    #[tokio::test]
    async fn default_plan_round_trips() {
        let config = test_config();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .unwrap();
        migrations::run_migrations(&pool, &config).await.unwrap();
        seed_default_plan(&pool, &config).await;

        let principal = PostgresPrincipalStore::with_pool(pool, Arc::new(config));
        let plan = principal.get_default_plan().await.unwrap();
        assert!(plan.is_default);
        assert_eq!(plan.meter_type, MeterType::Requests);
    }

    #[tokio::test]
    async fn route_and_upstream_round_trip() {
        let config = test_config();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .unwrap();
        migrations::run_migrations(&pool, &config).await.unwrap();
        let route = seed_upstream_and_route(&pool, &config).await;

        let routing = PostgresRoutingStore::with_pool(pool, Arc::new(config));
        let upstream = routing.get_upstream(route.upstream_id).await.unwrap();
        assert_eq!(upstream.id, route.upstream_id);

        let enabled = routing.list_enabled_routes().await.unwrap();
        assert!(enabled.iter().any(|r| r.id == route.id));
    }
}
