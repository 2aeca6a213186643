//! Per-user, per-billing-period quota enforcement.
//!
//! `Check` reads the current counters and compares against the plan's caps;
//! `Consume` is an atomic upsert against [`apigate_core::MeteringStore`].
//! Enforcement is soft by design: `Check` and `Consume` are not ordered
//! against each other across replicas, trading strict enforcement for one
//! write per request. See `DESIGN.md`.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use apigate_core::{MeterType, MeteringStore, Plan, QuotaCaps, QuotaState, UsageSummary};

use crate::error::GatewayError;

/// Fraction of the tightest cap at which a `usage.threshold` event fires.
pub const THRESHOLD_FRACTION: f64 = 0.9;

/// Build the plan's caps for `Check`/`Consume`. `Plan` carries a single
/// `requests_per_month` cap value, interpreted against whichever counter
/// `meter_type` names — the reading that requires no new `Plan` field.
/// See `DESIGN.md`.
#[must_use]
pub fn caps_for_plan(plan: &Plan) -> QuotaCaps {
    match plan.meter_type {
        MeterType::Requests => QuotaCaps { max_requests: plan.requests_per_month, ..Default::default() },
        MeterType::ComputeUnits => QuotaCaps { max_compute_units: plan.requests_per_month, ..Default::default() },
        MeterType::Bytes => QuotaCaps { max_bytes: plan.requests_per_month, ..Default::default() },
    }
}

/// Truncate `now` to the start of its UTC calendar month — the billing
/// period boundary used in the absence of a separately-modeled subscription
/// entity; `period_start` is derived here rather than invented as a new
/// entity. See `DESIGN.md`.
#[must_use]
pub fn current_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::{NaiveDate, TimeZone};
    let first_of_month = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .expect("valid calendar month")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    Utc.from_utc_datetime(&first_of_month)
}

pub struct QuotaGuard {
    store: Arc<dyn MeteringStore>,
}

impl QuotaGuard {
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store }
    }

    /// `true` if the user's current counters are within `caps`. A user with
    /// no prior usage this period is always within caps.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the read fails.
    pub async fn check(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
        caps: QuotaCaps,
    ) -> Result<bool, GatewayError> {
        match self.store.get_quota_state(user_id, period_start).await? {
            Some(state) => Ok(caps.allows(&state)),
            None => Ok(true),
        }
    }

    /// Atomically add `delta_*` to the user's counters for `period_start`,
    /// returning the post-update state and whether this update just crossed
    /// [`THRESHOLD_FRACTION`] or the cap itself (for `usage.threshold`/
    /// `usage.limit` event publication by the caller).
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the upsert fails.
    pub async fn consume(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
        delta_requests: u64,
        delta_compute: u64,
        delta_bytes: u64,
        caps: QuotaCaps,
    ) -> Result<ConsumeOutcome, GatewayError> {
        let before = self.store.get_quota_state(user_id, period_start).await?;
        let before_fraction = before.map_or(0.0, |s| caps.tightest_fraction(&s));

        let state = self
            .store
            .consume_quota(user_id, period_start, delta_requests, delta_compute, delta_bytes)
            .await?;
        let after_fraction = caps.tightest_fraction(&state);

        Ok(ConsumeOutcome {
            state,
            crossed_threshold: before_fraction < THRESHOLD_FRACTION && after_fraction >= THRESHOLD_FRACTION,
            crossed_limit: before_fraction < 1.0 && after_fraction >= 1.0,
        })
    }

    /// Replace a quota row's counters from an aggregated [`UsageSummary`].
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the write fails.
    pub async fn sync(&self, summary: &UsageSummary) -> Result<QuotaState, GatewayError> {
        Ok(self.store.sync_quota_state(summary).await?)
    }

    /// Prune rows older than `before`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the cleanup write fails.
    pub async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, GatewayError> {
        Ok(self.store.cleanup_quota_states(before).await?)
    }

    /// Run [`Self::cleanup`] on `interval`, pruning rows older than the
    /// current billing period's start, until `shutdown_rx` fires.
    pub async fn run_cleanup_loop(
        self: Arc<Self>,
        interval: std::time::Duration,
        mut shutdown_rx: tokio::sync::mpsc::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = ticker.tick() => {
                    let before = current_period_start(Utc::now());
                    if let Err(e) = self.cleanup(before).await {
                        tracing::warn!(error = %e, "quota cleanup failed");
                    }
                }
            }
        }
    }
}

/// The result of a [`QuotaGuard::consume`] call, including the threshold
/// crossings the caller should publish as `EventBus` events.
pub struct ConsumeOutcome {
    pub state: QuotaState,
    pub crossed_threshold: bool,
    pub crossed_limit: bool,
}

#[cfg(test)]
mod tests {
    use apigate_metering_memory::MemoryMeteringStore;

    use super::*;

    fn caps(max_requests: u64) -> QuotaCaps {
        QuotaCaps { max_requests, ..Default::default() }
    }

    #[tokio::test]
    async fn check_allows_when_no_prior_usage() {
        let store = Arc::new(MemoryMeteringStore::new());
        let guard = QuotaGuard::new(store);
        assert!(guard.check(Uuid::new_v4(), Utc::now(), caps(5)).await.unwrap());
    }

    #[tokio::test]
    async fn quota_hit_scenario_denies_at_cap() {
        let store = Arc::new(MemoryMeteringStore::new());
        let guard = QuotaGuard::new(store);
        let user_id = Uuid::new_v4();
        let period = Utc::now();

        guard.consume(user_id, period, 5, 0, 0, caps(5)).await.unwrap();
        assert!(!guard.check(user_id, period, caps(5)).await.unwrap());
    }

    #[tokio::test]
    async fn consume_reports_threshold_and_limit_crossings() {
        let store = Arc::new(MemoryMeteringStore::new());
        let guard = QuotaGuard::new(store);
        let user_id = Uuid::new_v4();
        let period = Utc::now();
        let caps = caps(10);

        let first = guard.consume(user_id, period, 8, 0, 0, caps).await.unwrap();
        assert!(first.crossed_threshold);
        assert!(!first.crossed_limit);

        let second = guard.consume(user_id, period, 2, 0, 0, caps).await.unwrap();
        assert!(second.crossed_limit);
    }

    #[tokio::test]
    async fn sync_replaces_counters_from_summary() {
        let store = Arc::new(MemoryMeteringStore::new());
        let guard = QuotaGuard::new(store);
        let user_id = Uuid::new_v4();
        let period = Utc::now();

        guard.consume(user_id, period, 100, 0, 0, QuotaCaps::default()).await.unwrap();

        let summary = apigate_metering::fixture_usage_summary(user_id, period, period + chrono::Duration::days(30));
        let synced = guard.sync(&summary).await.unwrap();
        assert_eq!(synced.request_count, summary.request_count);
    }

    #[tokio::test]
    async fn unlimited_caps_never_cross_threshold() {
        let store = Arc::new(MemoryMeteringStore::new());
        let guard = QuotaGuard::new(store);
        let user_id = Uuid::new_v4();
        let period = Utc::now();

        let outcome = guard.consume(user_id, period, 1_000_000, 0, 0, QuotaCaps::default()).await.unwrap();
        assert!(!outcome.crossed_threshold);
        assert!(!outcome.crossed_limit);
    }
}
