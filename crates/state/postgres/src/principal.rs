use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use apigate_core::{Key, MeterType, Plan, PrincipalStore, StoreError, User, UserStatus};

use crate::config::PostgresConfig;

/// `PostgreSQL`-backed [`PrincipalStore`].
pub struct PostgresPrincipalStore {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresPrincipalStore {
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

fn parse_user_status(raw: &str) -> UserStatus {
    match raw {
        "suspended" => UserStatus::Suspended,
        "deleted" => UserStatus::Deleted,
        _ => UserStatus::Active,
    }
}

fn user_status_str(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Active => "active",
        UserStatus::Suspended => "suspended",
        UserStatus::Deleted => "deleted",
    }
}

fn parse_meter_type(raw: &str) -> MeterType {
    match raw {
        "compute_units" => MeterType::ComputeUnits,
        "bytes" => MeterType::Bytes,
        _ => MeterType::Requests,
    }
}

#[async_trait]
impl PrincipalStore for PostgresPrincipalStore {
    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, email, plan_id, status, created_at, updated_at FROM {} WHERE id = $1",
            self.config.users_table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound)?;

        Ok(User {
            id: row.get("id"),
            email: row.get("email"),
            plan_id: row.get("plan_id"),
            status: parse_user_status(row.get("status")),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn find_keys_by_prefix(&self, prefix: &str) -> Result<Vec<Key>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, user_id, hash, prefix, name, scopes, expires_at, revoked_at, last_used, created_at
             FROM {} WHERE prefix = $1",
            self.config.keys_table()
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_key).collect())
    }

    async fn get_key(&self, id: Uuid) -> Result<Key, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, user_id, hash, prefix, name, scopes, expires_at, revoked_at, last_used, created_at
             FROM {} WHERE id = $1",
            self.config.keys_table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound)?;

        Ok(row_to_key(row))
    }

    async fn update_key_last_used(&self, key_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET last_used = $2 WHERE id = $1",
            self.config.keys_table()
        ))
        .bind(key_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_plan(&self, id: Uuid) -> Result<Plan, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, name, rate_limit_per_minute, requests_per_month, price_monthly,
                    overage_price, meter_type, estimated_cost_per_req, is_default, enabled
             FROM {} WHERE id = $1",
            self.config.plans_table()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound)?;

        Ok(row_to_plan(row))
    }

    async fn get_default_plan(&self) -> Result<Plan, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT id, name, rate_limit_per_minute, requests_per_month, price_monthly,
                    overage_price, meter_type, estimated_cost_per_req, is_default, enabled
             FROM {} WHERE is_default LIMIT 1",
            self.config.plans_table()
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
        .ok_or(StoreError::NotFound)?;

        Ok(row_to_plan(row))
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT id, name, rate_limit_per_minute, requests_per_month, price_monthly,
                    overage_price, meter_type, estimated_cost_per_req, is_default, enabled
             FROM {}",
            self.config.plans_table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(row_to_plan).collect())
    }
}

fn row_to_key(row: sqlx::postgres::PgRow) -> Key {
    Key {
        id: row.get("id"),
        user_id: row.get("user_id"),
        hash: SecretString::from(row.get::<String, _>("hash")),
        prefix: row.get("prefix"),
        name: row.get("name"),
        scopes: row.get::<Vec<String>, _>("scopes"),
        expires_at: row.get("expires_at"),
        revoked_at: row.get("revoked_at"),
        last_used: row.get("last_used"),
        created_at: row.get("created_at"),
    }
}

fn row_to_plan(row: sqlx::postgres::PgRow) -> Plan {
    Plan {
        id: row.get("id"),
        name: row.get("name"),
        #[allow(clippy::cast_sign_loss)]
        rate_limit_per_minute: row.get::<i32, _>("rate_limit_per_minute") as u32,
        #[allow(clippy::cast_sign_loss)]
        requests_per_month: row.get::<i64, _>("requests_per_month") as u64,
        price_monthly: row.get("price_monthly"),
        overage_price: row.get("overage_price"),
        meter_type: parse_meter_type(row.get("meter_type")),
        estimated_cost_per_req: row.get("estimated_cost_per_req"),
        is_default: row.get("is_default"),
        enabled: row.get("enabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_status_round_trips_through_strings() {
        for status in [UserStatus::Active, UserStatus::Suspended, UserStatus::Deleted] {
            assert_eq!(parse_user_status(user_status_str(status)), status);
        }
    }

    #[test]
    fn unknown_user_status_defaults_to_active() {
        assert_eq!(parse_user_status("weird"), UserStatus::Active);
    }

    #[test]
    fn meter_type_parses_known_variants() {
        assert_eq!(parse_meter_type("bytes"), MeterType::Bytes);
        assert_eq!(parse_meter_type("compute_units"), MeterType::ComputeUnits);
        assert_eq!(parse_meter_type("requests"), MeterType::Requests);
        assert_eq!(parse_meter_type("garbage"), MeterType::Requests);
    }
}
