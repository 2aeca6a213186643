//! Usage metering pipeline: bounded buffer, batched
//! flush, periodic rollup, quota sync, and retention.
//!
//! The buffer is a fixed-capacity `VecDeque` behind a `parking_lot::Mutex`,
//! the same rolling-window shape `apigate-server`'s own request metrics use
//! for latency samples. `Record` locks just long enough to push (and, on a
//! full buffer, `pop_front` the oldest event first) then notifies the
//! batcher — never awaiting, so it never blocks the request path. This
//! matches spec §6 literally: the *oldest* event is evicted on overflow,
//! not the incoming one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use apigate_core::{MeteringStore, UsageEvent, UsageSummary};

use crate::error::GatewayError;
use crate::quota::QuotaGuard;

#[derive(Debug, Clone, Copy)]
pub struct UsageRecorderConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub rollup_interval: Duration,
    pub retention: chrono::Duration,
}

impl Default for UsageRecorderConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_size: 500,
            flush_interval: Duration::from_secs(2),
            rollup_interval: Duration::from_secs(60),
            retention: chrono::Duration::days(90),
        }
    }
}

/// The producer side: `Record` is cheap and non-blocking.
pub struct UsageRecorder {
    buffer: Arc<Mutex<VecDeque<UsageEvent>>>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl UsageRecorder {
    /// Build a recorder and its paired [`UsageBatcher`]. The batcher owns
    /// the shared buffer and must be spawned by the caller for events to
    /// ever be persisted.
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>, config: UsageRecorderConfig) -> (Self, UsageBatcher) {
        let buffer = Arc::new(Mutex::new(VecDeque::with_capacity(config.buffer_capacity)));
        let dropped = Arc::new(AtomicU64::new(0));
        let notify = Arc::new(Notify::new());
        let recorder = Self {
            buffer: Arc::clone(&buffer),
            capacity: config.buffer_capacity,
            dropped: Arc::clone(&dropped),
            notify: Arc::clone(&notify),
        };
        let batcher = UsageBatcher { store, buffer, config, dropped, notify };
        (recorder, batcher)
    }

    /// Enqueue `event`. Never blocks; on a full buffer the *oldest* queued
    /// event is evicted to make room, per spec §6.
    pub fn record(&self, event: UsageEvent) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("usage event buffer full; oldest event dropped");
        }
        buffer.push_back(event);
        drop(buffer);
        self.notify.notify_one();
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The consumer side: drains the buffer on a size-or-interval trigger and
/// flushes each batch as one transactional insert.
pub struct UsageBatcher {
    store: Arc<dyn MeteringStore>,
    buffer: Arc<Mutex<VecDeque<UsageEvent>>>,
    config: UsageRecorderConfig,
    dropped: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl UsageBatcher {
    /// Drain the buffer until `shutdown_rx` fires, flushing whichever comes
    /// first: `batch_size` events accumulated, or `flush_interval` elapsed.
    /// On shutdown, the in-flight batch is flushed before returning.
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.drain_and_flush().await;
                    info!("usage batcher received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    self.drain_and_flush().await;
                }
                () = self.notify.notified() => {
                    if self.buffer.lock().len() >= self.config.batch_size {
                        self.drain_and_flush().await;
                    }
                }
            }
        }
    }

    async fn drain_and_flush(&self) {
        let batch: Vec<UsageEvent> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        self.flush(&batch).await;
    }

    async fn flush(&self, batch: &[UsageEvent]) {
        if batch.is_empty() {
            return;
        }
        match self.store.insert_usage_events(batch).await {
            Ok(()) => info!(count = batch.len(), "usage batch flushed"),
            Err(e) => warn!(error = %e, count = batch.len(), "usage batch flush failed; events lost (dead-letter)"),
        }
    }

    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Periodic rollup, quota sync, and retention cleanup.
pub struct UsageRollup {
    store: Arc<dyn MeteringStore>,
    quota: Arc<QuotaGuard>,
}

impl UsageRollup {
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>, quota: Arc<QuotaGuard>) -> Self {
        Self { store, quota }
    }

    /// Aggregate events in `[since, until)` for `user_id`/`period_start` into
    /// a `UsageSummary`, upsert it, then `Sync` the quota row from it.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if either write fails.
    pub async fn rollup_period(
        &self,
        user_id: uuid::Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<UsageSummary, GatewayError> {
        let events = self.store.list_usage_events_since(since, until).await?;
        let user_events: Vec<_> = events.into_iter().filter(|e| e.user_id == user_id).collect();

        let summary = UsageSummary::aggregate(user_id, period_start, period_end, &user_events);
        self.store.upsert_usage_summary(summary.clone()).await?;
        self.quota.sync(&summary).await?;
        Ok(summary)
    }

    /// Remove events older than the retention horizon.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the delete fails.
    pub async fn cleanup(&self, before: DateTime<Utc>) -> Result<u64, GatewayError> {
        Ok(self.store.delete_usage_events_before(before).await?)
    }
}

#[cfg(test)]
mod tests {
    use apigate_metering::fixture_usage_event;
    use apigate_metering_memory::MemoryMeteringStore;

    use super::*;

    #[tokio::test]
    async fn record_is_non_blocking_and_flushes_on_batch_size() {
        let store = Arc::new(MemoryMeteringStore::new());
        let (recorder, batcher) =
            UsageRecorder::new(store.clone(), UsageRecorderConfig { batch_size: 3, ..Default::default() });
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(batcher.run(shutdown_rx));

        let key_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        for _ in 0..3 {
            recorder.record(fixture_usage_event(key_id, user_id, Utc::now()));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        let events = store
            .list_usage_events_since(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn full_buffer_drops_and_counts() {
        let store = Arc::new(MemoryMeteringStore::new());
        let (recorder, _batcher) =
            UsageRecorder::new(store, UsageRecorderConfig { buffer_capacity: 1, ..Default::default() });

        let key_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        recorder.record(fixture_usage_event(key_id, user_id, Utc::now()));
        recorder.record(fixture_usage_event(key_id, user_id, Utc::now()));
        recorder.record(fixture_usage_event(key_id, user_id, Utc::now()));

        assert!(recorder.dropped_count() >= 1);
    }

    /// Spec §6: "If full, `Record` drops the oldest event ... ". The
    /// retained event after overflow must be the most recently recorded
    /// one, not the first.
    #[tokio::test]
    async fn full_buffer_evicts_oldest_event_not_newest() {
        let store = Arc::new(MemoryMeteringStore::new());
        let (recorder, batcher) =
            UsageRecorder::new(store.clone(), UsageRecorderConfig { buffer_capacity: 1, ..Default::default() });

        let key_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        let oldest = fixture_usage_event(key_id, user_id, Utc::now());
        let newest = fixture_usage_event(key_id, user_id, Utc::now());
        let newest_id = newest.id;

        recorder.record(oldest);
        recorder.record(newest);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(batcher.run(shutdown_rx));
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        let events = store
            .list_usage_events_since(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, newest_id);
    }

    #[tokio::test]
    async fn rollup_aggregates_and_syncs_quota() {
        let store = Arc::new(MemoryMeteringStore::new());
        let quota = Arc::new(QuotaGuard::new(store.clone()));
        let rollup = UsageRollup::new(store.clone(), quota.clone());

        let user_id = uuid::Uuid::new_v4();
        let key_id = uuid::Uuid::new_v4();
        let now = Utc::now();
        store
            .insert_usage_events(&[fixture_usage_event(key_id, user_id, now), fixture_usage_event(key_id, user_id, now)])
            .await
            .unwrap();

        let summary = rollup
            .rollup_period(user_id, now - chrono::Duration::days(1), now + chrono::Duration::days(1), now - chrono::Duration::minutes(5), now + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(summary.request_count, 2);

        let quota_state = store.get_quota_state(user_id, now - chrono::Duration::days(1)).await.unwrap().unwrap();
        assert_eq!(quota_state.request_count, 2);
    }
}
