//! TOML-deserializable configuration for the standalone server binary.
//!
//! One aggregator struct per concern, each with `#[serde(default)]` and a
//! `Default` impl, mirroring how `apigate-gateway`'s own `GatewayConfig`
//! groups its tunables. Loaded at startup and merged with CLI overrides;
//! routes/upstreams/plans themselves are never configured here — they come
//! from the `RoutingStore`/`PrincipalStore` backend selected by
//! [`StateBackendConfig`]/[`MeteringBackendConfig`].

use std::time::Duration;

use serde::Deserialize;

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_seconds() -> u64 {
    30
}

/// Bind address and process-lifecycle tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
        }
    }
}

/// Selects and configures the `PrincipalStore`/`RoutingStore` backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateBackendConfig {
    /// `"memory"` or `"postgres"`.
    pub backend: String,
    pub url: Option<String>,
    pub pool_size: u32,
    pub schema: Option<String>,
}

impl Default for StateBackendConfig {
    fn default() -> Self {
        Self { backend: "memory".to_owned(), url: None, pool_size: 10, schema: None }
    }
}

/// Selects and configures the `MeteringStore` backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeteringBackendConfig {
    /// `"memory"` or `"postgres"`.
    pub backend: String,
    pub url: Option<String>,
    pub pool_size: u32,
    pub schema: Option<String>,
}

impl Default for MeteringBackendConfig {
    fn default() -> Self {
        Self { backend: "memory".to_owned(), url: None, pool_size: 10, schema: None }
    }
}

fn default_rate_limit_cleanup_secs() -> u64 {
    300
}

fn default_quota_cleanup_secs() -> u64 {
    3600
}

fn default_rollup_interval_secs() -> u64 {
    60
}

fn default_usage_retention_days() -> i64 {
    90
}

fn default_api_key_header() -> String {
    "X-API-Key".to_owned()
}

fn default_burst() -> u32 {
    0
}

fn default_request_deadline_secs() -> u64 {
    30
}

/// Gateway-wide tunables that map directly onto `apigate_gateway::GatewayConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_burst")]
    pub default_burst: u32,
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub rate_limit_cleanup_interval_secs: u64,
    #[serde(default = "default_quota_cleanup_secs")]
    pub quota_cleanup_interval_secs: u64,
    #[serde(default = "default_rollup_interval_secs")]
    pub rollup_interval_secs: u64,
    #[serde(default = "default_usage_retention_days")]
    pub usage_retention_days: i64,
    #[serde(default = "default_request_deadline_secs")]
    pub default_request_deadline_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            api_key_header: default_api_key_header(),
            default_burst: default_burst(),
            rate_limit_cleanup_interval_secs: default_rate_limit_cleanup_secs(),
            quota_cleanup_interval_secs: default_quota_cleanup_secs(),
            rollup_interval_secs: default_rollup_interval_secs(),
            usage_retention_days: default_usage_retention_days(),
            default_request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

impl GatewaySettings {
    #[must_use]
    pub fn to_gateway_config(&self) -> apigate_gateway::GatewayConfig {
        apigate_gateway::GatewayConfig {
            api_key_header: self.api_key_header.clone(),
            default_burst: self.default_burst,
            rate_limit_cleanup_interval: Duration::from_secs(self.rate_limit_cleanup_interval_secs),
            quota_cleanup_interval: Duration::from_secs(self.quota_cleanup_interval_secs),
            rollup_interval: Duration::from_secs(self.rollup_interval_secs),
            usage_retention: chrono::Duration::days(self.usage_retention_days),
            usage_recorder: self.usage_recorder_config(),
            default_request_deadline: Duration::from_secs(self.default_request_deadline_secs),
        }
    }

    fn usage_recorder_config(&self) -> apigate_gateway::UsageRecorderConfig {
        apigate_gateway::UsageRecorderConfig::default()
    }
}

fn default_usage_buffer_capacity() -> usize {
    10_000
}

fn default_usage_batch_size() -> usize {
    500
}

fn default_usage_flush_interval_secs() -> u64 {
    2
}

/// Usage-recorder buffer/batch tunables, separated from [`GatewaySettings`]
/// because they size a concrete `mpsc` channel, not a general interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    #[serde(default = "default_usage_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_usage_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_usage_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: default_usage_buffer_capacity(),
            batch_size: default_usage_batch_size(),
            flush_interval_secs: default_usage_flush_interval_secs(),
        }
    }
}

impl UsageSettings {
    #[must_use]
    pub fn to_recorder_config(&self, rollup_interval_secs: u64, retention_days: i64) -> apigate_gateway::UsageRecorderConfig {
        apigate_gateway::UsageRecorderConfig {
            buffer_capacity: self.buffer_capacity,
            batch_size: self.batch_size,
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            rollup_interval: Duration::from_secs(rollup_interval_secs),
            retention: chrono::Duration::days(retention_days),
        }
    }
}

fn default_webhook_pool_size() -> usize {
    8
}

fn default_webhook_retry_interval_secs() -> u64 {
    30
}

/// Webhook dispatcher concurrency/timeout defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    #[serde(default = "default_webhook_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_webhook_retry_interval_secs")]
    pub retry_sweep_interval_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self { pool_size: default_webhook_pool_size(), retry_sweep_interval_secs: default_webhook_retry_interval_secs() }
    }
}

/// Top-level configuration, aggregating every sub-config behind
/// `#[serde(default)]` so a partial (or absent) TOML file is always valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApigateConfig {
    pub server: ServerSettings,
    pub state: StateBackendConfig,
    pub metering: MeteringBackendConfig,
    pub gateway: GatewaySettings,
    pub usage: UsageSettings,
    pub webhook: WebhookSettings,
}

impl ApigateConfig {
    /// Load from `path`, falling back to defaults (parsed from an empty
    /// string, so every `#[serde(default)]` kicks in) if the file is absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but fails to parse as TOML.
    pub fn load(path: &str) -> Result<Self, crate::error::ServerError> {
        if std::path::Path::new(path).exists() {
            let contents = std::fs::read_to_string(path).map_err(crate::error::ServerError::Io)?;
            toml::from_str(&contents).map_err(|e| crate::error::ServerError::Config(e.to_string()))
        } else {
            toml::from_str("").map_err(|e| crate::error::ServerError::Config(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_parses_to_defaults() {
        let config: ApigateConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.state.backend, "memory");
        assert_eq!(config.metering.backend, "memory");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml_str = r#"
            [server]
            port = 9000

            [state]
            backend = "postgres"
            url = "postgres://localhost/apigate"
        "#;
        let config: ApigateConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.state.backend, "postgres");
        assert_eq!(config.metering.backend, "memory");
    }
}
