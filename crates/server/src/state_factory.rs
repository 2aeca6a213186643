//! Construct the `PrincipalStore`/`RoutingStore`/`MeteringStore` bindings
//! named by [`crate::config::ApigateConfig`]'s `backend` fields.
//!
//! No single constructor in `apigate-state-postgres`/`apigate-metering-postgres`
//! returns a trait object directly (they return the concrete binding so
//! tests can reach backend-specific helpers), so this module is the one
//! place that erases to `Arc<dyn ...>` and is the only caller that needs to
//! know both backends exist.

use std::sync::Arc;

use apigate_core::{MeteringStore, PrincipalStore, RoutingStore};

use crate::config::{MeteringBackendConfig, StateBackendConfig};
use crate::error::ServerError;

/// The `PrincipalStore`/`RoutingStore` pair sharing one backend.
pub struct StateBackend {
    pub principal_store: Arc<dyn PrincipalStore>,
    pub routing_store: Arc<dyn RoutingStore>,
}

/// Build the principal/routing backend named by `config.backend`.
///
/// # Errors
/// Returns [`ServerError::Config`] for an unrecognized backend name, or
/// whatever the chosen backend's connect/migrate step returns.
pub async fn create_state_backend(config: &StateBackendConfig) -> Result<StateBackend, ServerError> {
    match config.backend.as_str() {
        "memory" => Ok(StateBackend {
            principal_store: Arc::new(apigate_state_memory::MemoryPrincipalStore::new()),
            routing_store: Arc::new(apigate_state_memory::MemoryRoutingStore::new()),
        }),
        "postgres" => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| ServerError::Config("state.url is required when state.backend = \"postgres\"".to_owned()))?;
            let pg_config = apigate_state_postgres::PostgresConfig {
                url,
                pool_size: config.pool_size,
                schema: config.schema.clone().unwrap_or_else(|| "public".to_owned()),
            };
            let (principal, routing) = apigate_state_postgres::connect(pg_config).await?;
            Ok(StateBackend {
                principal_store: Arc::new(principal),
                routing_store: Arc::new(routing),
            })
        }
        other => Err(ServerError::Config(format!("unknown state backend: {other}"))),
    }
}

/// Build the metering backend named by `config.backend`.
///
/// # Errors
/// Returns [`ServerError::Config`] for an unrecognized backend name, or
/// whatever the chosen backend's connect/migrate step returns.
pub async fn create_metering_backend(config: &MeteringBackendConfig) -> Result<Arc<dyn MeteringStore>, ServerError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(apigate_metering_memory::MemoryMeteringStore::new())),
        "postgres" => {
            let url = config.url.clone().ok_or_else(|| {
                ServerError::Config("metering.url is required when metering.backend = \"postgres\"".to_owned())
            })?;
            let pg_config = apigate_metering_postgres::PostgresConfig {
                url,
                pool_size: config.pool_size,
                schema: config.schema.clone().unwrap_or_else(|| "public".to_owned()),
            };
            let store = apigate_metering_postgres::connect(pg_config).await?;
            Ok(Arc::new(store))
        }
        other => Err(ServerError::Config(format!("unknown metering backend: {other}"))),
    }
}
