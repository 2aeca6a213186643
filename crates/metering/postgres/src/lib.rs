//! `PostgreSQL`-backed `MeteringStore` binding. Durable, multi-replica
//! counterpart to `apigate-metering-memory`.

mod config;
mod migrations;
mod store;

pub use config::PostgresConfig;
pub use store::PostgresMeteringStore;

use apigate_core::StoreError;

/// Connect to `PostgreSQL` and run migrations, returning a ready
/// [`PostgresMeteringStore`].
///
/// # Errors
/// Returns [`StoreError::Backend`] if the pool can't be built or migrations
/// fail.
pub async fn connect(config: PostgresConfig) -> Result<PostgresMeteringStore, StoreError> {
    PostgresMeteringStore::new(config).await
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use apigate_core::MeteringStore;
    use apigate_metering::fixture_webhook;

    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("APIGATE_TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/apigate_test".to_owned()),
            pool_size: 5,
            schema: "public".to_owned(),
        }
    }

    #[tokio::test]
    async fn rate_limit_conformance_suite_passes() {
        let store = connect(test_config()).await.unwrap();
        apigate_metering::run_rate_limit_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn quota_conformance_suite_passes() {
        let store = connect(test_config()).await.unwrap();
        apigate_metering::run_quota_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn usage_log_conformance_suite_passes() {
        let store = connect(test_config()).await.unwrap();
        apigate_metering::run_usage_log_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_conformance_suite_passes() {
        let store = connect(test_config()).await.unwrap();
        apigate_metering::run_webhook_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn registered_webhook_is_listed() {
        let store = connect(test_config()).await.unwrap();
        let hook = fixture_webhook(None, &[apigate_core::EventType::KeyCreated]);
        store.insert_webhook(&hook).await.unwrap();
        let listed = store.list_webhooks().await.unwrap();
        assert!(listed.iter().any(|w| w.id == hook.id));
    }
}
