//! Background loops `main.rs` spawns alongside the HTTP listener, one
//! function per concern, the same shape `apigate_gateway`'s own
//! `run_cleanup_loop`/`run_retry_scheduler` take.

use std::sync::Arc;
use std::time::Duration;

use apigate_core::MeteringStore;
use apigate_gateway::{quota, UsageRollup};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn next_month_start(period_start: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if period_start.month() == 12 {
        (period_start.year() + 1, 1)
    } else {
        (period_start.year(), period_start.month() + 1)
    };
    let naive = NaiveDate::from_ymd_opt(year, month, 1)
        .expect("valid calendar month")
        .and_hms_opt(0, 0, 0)
        .expect("valid time");
    Utc.from_utc_datetime(&naive)
}

/// Aggregate events since the last watermark into `UsageSummary` rows, sync
/// each affected user's `QuotaState`, and prune raw events past the
/// retention horizon — the rollup/quota-sync/retention trio the usage
/// pipeline runs on one interval.
pub async fn run_rollup_loop(
    store: Arc<dyn MeteringStore>,
    rollup: Arc<UsageRollup>,
    interval: Duration,
    retention: chrono::Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut watermark = Utc::now() - chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::minutes(1));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("rollup loop received shutdown signal");
                return;
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                match store.list_usage_events_since(watermark, now).await {
                    Ok(events) => {
                        let user_ids: std::collections::HashSet<_> = events.iter().map(|e| e.user_id).collect();
                        let period_start = quota::current_period_start(now);
                        let period_end = next_month_start(period_start);
                        for user_id in user_ids {
                            if let Err(e) = rollup.rollup_period(user_id, period_start, period_end, watermark, now).await {
                                warn!(%user_id, error = %e, "usage rollup failed for user");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to list usage events for rollup"),
                }

                if let Err(e) = rollup.cleanup(now - retention).await {
                    warn!(error = %e, "usage retention cleanup failed");
                }

                watermark = now;
            }
        }
    }
}
