//! Gateway-wide tunables that aren't part of the per-route/per-plan data
//! model: header names, the default burst allowance, and every background
//! task's interval (ambient configuration).

use std::time::Duration;

use crate::usage::UsageRecorderConfig;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Header name checked for a presented API key when `Authorization:
    /// Bearer` is absent.
    pub api_key_header: String,

    /// `Plan` carries no `burst` field; it's a gateway-wide constant applied
    /// uniformly across plans (see `DESIGN.md` for the rationale).
    pub default_burst: u32,

    /// Interval the rate-limit cleanup background task runs on.
    pub rate_limit_cleanup_interval: Duration,

    /// Interval the quota cleanup background task runs on.
    pub quota_cleanup_interval: Duration,

    /// Interval the rollup + quota-sync background task runs on.
    pub rollup_interval: Duration,

    /// Horizon past which raw usage events are deleted.
    pub usage_retention: chrono::Duration,

    pub usage_recorder: UsageRecorderConfig,

    /// Deadline applied to a request with no caller-supplied timeout.
    pub default_request_deadline: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key_header: "X-API-Key".to_owned(),
            default_burst: 0,
            rate_limit_cleanup_interval: Duration::from_secs(300),
            quota_cleanup_interval: Duration::from_secs(3600),
            rollup_interval: Duration::from_secs(60),
            usage_retention: chrono::Duration::days(90),
            usage_recorder: UsageRecorderConfig::default(),
            default_request_deadline: Duration::from_secs(30),
        }
    }
}
