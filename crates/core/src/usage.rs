use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted per-key rate-limit window. A row whose `window_end` has already
/// elapsed is semantically equivalent to a fresh (zeroed) window — see
/// `apigate-gateway::ratelimit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitWindowState {
    pub key_id: Uuid,
    pub count: u32,
    pub window_end: DateTime<Utc>,
    pub burst_used: u32,
}

/// Per-`(user_id, period_start)` quota counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
    pub user_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub request_count: u64,
    pub compute_units: u64,
    pub bytes_used: u64,
    pub last_updated: DateTime<Utc>,
}

/// Caps a plan imposes for one billing period. `0` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaCaps {
    pub max_requests: u64,
    pub max_compute_units: u64,
    pub max_bytes: u64,
}

impl QuotaCaps {
    /// Returns `true` if `state` is within all configured (nonzero) caps.
    #[must_use]
    pub fn allows(&self, state: &QuotaState) -> bool {
        let under = |used: u64, cap: u64| cap == 0 || used < cap;
        under(state.request_count, self.max_requests)
            && under(state.compute_units, self.max_compute_units)
            && under(state.bytes_used, self.max_bytes)
    }

    /// Fraction (0.0-1.0+) of the tightest configured cap that `state` has
    /// consumed. Used to decide when to publish `usage.threshold`/`usage.limit`.
    /// Unlimited plans (`max_requests == 0`) never cross a threshold.
    #[must_use]
    pub fn tightest_fraction(&self, state: &QuotaState) -> f64 {
        let frac = |used: u64, cap: u64| {
            if cap == 0 {
                0.0
            } else {
                used as f64 / cap as f64
            }
        };
        [
            frac(state.request_count, self.max_requests),
            frac(state.compute_units, self.max_compute_units),
            frac(state.bytes_used, self.max_bytes),
        ]
        .into_iter()
        .fold(0.0_f64, f64::max)
    }
}

/// One recorded request. Append-only; `timestamp` is authoritative since
/// events for one key may be persisted out of order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub key_id: Uuid,
    pub user_id: Uuid,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub cost_multiplier: f64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Derived, upsertable aggregate of [`UsageEvent`]s for one billing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub user_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub request_count: u64,
    pub compute_units: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}

impl UsageSummary {
    /// Fold a batch of events (already filtered to one user/period) into a
    /// fresh summary. `compute_units` sums each event's `cost_multiplier`,
    /// rounded down, consistent with the `ComputeUnits` meter type.
    #[must_use]
    pub fn aggregate(
        user_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        events: &[UsageEvent],
    ) -> Self {
        let request_count = events.len() as u64;
        let mut compute_units = 0.0_f64;
        let mut bytes_in = 0_u64;
        let mut bytes_out = 0_u64;
        let mut error_count = 0_u64;
        let mut latency_sum = 0_u64;

        for event in events {
            compute_units += event.cost_multiplier;
            bytes_in += event.request_bytes;
            bytes_out += event.response_bytes;
            latency_sum += event.latency_ms;
            if event.status_code >= 500 {
                error_count += 1;
            }
        }

        let avg_latency_ms = if request_count == 0 {
            0.0
        } else {
            latency_sum as f64 / request_count as f64
        };

        Self {
            user_id,
            period_start,
            period_end,
            request_count,
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            compute_units: compute_units as u64,
            bytes_in,
            bytes_out,
            error_count,
            avg_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: u16, cost: f64, req_bytes: u64, resp_bytes: u64, latency: u64) -> UsageEvent {
        UsageEvent {
            id: Uuid::new_v4(),
            key_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            method: "GET".into(),
            path: "/v1/items".into(),
            status_code: status,
            latency_ms: latency,
            request_bytes: req_bytes,
            response_bytes: resp_bytes,
            cost_multiplier: cost,
            ip_address: None,
            user_agent: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn quota_caps_zero_means_unlimited() {
        let caps = QuotaCaps::default();
        let state = QuotaState {
            user_id: Uuid::new_v4(),
            period_start: Utc::now(),
            request_count: 1_000_000,
            compute_units: 0,
            bytes_used: 0,
            last_updated: Utc::now(),
        };
        assert!(caps.allows(&state));
        assert_eq!(caps.tightest_fraction(&state), 0.0);
    }

    #[test]
    fn quota_caps_denies_over_cap() {
        let caps = QuotaCaps {
            max_requests: 5,
            ..Default::default()
        };
        let mut state = QuotaState {
            user_id: Uuid::new_v4(),
            period_start: Utc::now(),
            request_count: 4,
            compute_units: 0,
            bytes_used: 0,
            last_updated: Utc::now(),
        };
        assert!(caps.allows(&state));
        state.request_count = 5;
        assert!(!caps.allows(&state));
    }

    #[test]
    fn summary_aggregates_events() {
        let events = vec![event(200, 1.0, 100, 200, 10), event(500, 2.0, 50, 0, 30)];
        let now = Utc::now();
        let summary = UsageSummary::aggregate(Uuid::new_v4(), now, now, &events);
        assert_eq!(summary.request_count, 2);
        assert_eq!(summary.compute_units, 3);
        assert_eq!(summary.bytes_in, 150);
        assert_eq!(summary.bytes_out, 200);
        assert_eq!(summary.error_count, 1);
        assert!((summary.avg_latency_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn summary_of_empty_batch() {
        let now = Utc::now();
        let summary = UsageSummary::aggregate(Uuid::new_v4(), now, now, &[]);
        assert_eq!(summary.request_count, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
    }
}
