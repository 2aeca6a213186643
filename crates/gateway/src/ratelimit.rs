//! Fixed-window + burst rate limiting.
//!
//! The authoritative decision is always persisted through
//! [`apigate_core::MeteringStore`] so stateless replicas observe the same
//! counter. An in-process `DashMap<KeyId, Mutex<()>>` serializes concurrent
//! callers for the *same* key on this replica, without holding any lock
//! across the store round-trip itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use apigate_core::{MeteringStore, RateLimitWindowState};

use crate::error::GatewayError;

/// The window length fixes at 60 seconds.
const WINDOW_SECS: i64 = 60;

/// The decision [`RateLimiter::allow`] returns.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub struct RateLimiter {
    store: Arc<dyn MeteringStore>,
    /// Per-key mutexes, ephemeral and garbage-collected alongside the
    /// cleanup job.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self { store, locks: DashMap::new() }
    }

    /// Atomically decide allow/deny for `key_id` under `limit_per_minute` +
    /// `burst`.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the `MeteringStore` read/write fails.
    pub async fn allow(
        &self,
        key_id: Uuid,
        limit_per_minute: u32,
        burst: u32,
    ) -> Result<RateLimitDecision, GatewayError> {
        let lock = Arc::clone(self.locks.entry(key_id).or_insert_with(|| Arc::new(Mutex::new(()))).value());
        let _guard = lock.lock().await;

        let now = Utc::now();
        let existing = self.store.get_rate_limit_window(key_id).await?;

        let mut window = match existing {
            Some(w) if w.window_end > now => w,
            _ => RateLimitWindowState {
                key_id,
                count: 0,
                window_end: now + chrono::Duration::seconds(WINDOW_SECS),
                burst_used: 0,
            },
        };

        let decision = if window.count < limit_per_minute {
            window.count += 1;
            RateLimitDecision {
                allowed: true,
                limit: limit_per_minute,
                remaining: limit_per_minute - window.count,
                reset_at: window.window_end,
            }
        } else if window.burst_used < burst {
            window.burst_used += 1;
            RateLimitDecision {
                allowed: true,
                limit: limit_per_minute,
                remaining: 0,
                reset_at: window.window_end,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                limit: limit_per_minute,
                remaining: 0,
                reset_at: window.window_end,
            }
        };

        self.store.put_rate_limit_window(window).await?;
        Ok(decision)
    }

    /// Delete rows whose window ended more than an hour ago. Intended to be
    /// driven by a periodic background task.
    ///
    /// # Errors
    /// Returns [`GatewayError::Store`] if the cleanup write fails.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<u64, GatewayError> {
        let removed = self.store.cleanup_rate_limit_windows(now - chrono::Duration::hours(1)).await?;
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(removed)
    }

    /// Run [`Self::cleanup`] on `interval` until `shutdown_rx` fires.
    pub async fn run_cleanup_loop(self: Arc<Self>, interval: Duration, mut shutdown_rx: tokio::sync::mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup(Utc::now()).await {
                        tracing::warn!(error = %e, "rate-limit cleanup failed");
                    }
                }
            }
        }
    }

    /// `Retry-After` seconds, clamped to the window length, for a denied
    /// decision (response header).
    #[must_use]
    pub fn retry_after_secs(decision: &RateLimitDecision, now: DateTime<Utc>) -> u64 {
        (decision.reset_at - now).num_seconds().clamp(0, WINDOW_SECS) as u64
    }
}

#[cfg(test)]
mod tests {
    use apigate_metering_memory::MemoryMeteringStore;

    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_burst_then_denies() {
        let store = Arc::new(MemoryMeteringStore::new());
        let limiter = RateLimiter::new(store);
        let key_id = Uuid::new_v4();

        for i in 0..10 {
            let d = limiter.allow(key_id, 10, 2).await.unwrap();
            assert!(d.allowed, "request {i} should be allowed within limit");
        }
        for i in 0..2 {
            let d = limiter.allow(key_id, 10, 2).await.unwrap();
            assert!(d.allowed, "burst request {i} should be allowed");
        }
        let denied = limiter.allow(key_id, 10, 2).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn remaining_counts_down_within_limit() {
        let store = Arc::new(MemoryMeteringStore::new());
        let limiter = RateLimiter::new(store);
        let key_id = Uuid::new_v4();

        let first = limiter.allow(key_id, 10, 0).await.unwrap();
        assert_eq!(first.remaining, 9);
    }

    #[tokio::test]
    async fn exhaustion_scenario_11_requests_limit_10_burst_0() {
        let store = Arc::new(MemoryMeteringStore::new());
        let limiter = RateLimiter::new(store);
        let key_id = Uuid::new_v4();

        let mut allowed_count = 0;
        let mut last_denied = None;
        for _ in 0..11 {
            let d = limiter.allow(key_id, 10, 0).await.unwrap();
            if d.allowed {
                allowed_count += 1;
            } else {
                last_denied = Some(d);
            }
        }
        assert_eq!(allowed_count, 10);
        let denied = last_denied.expect("11th request should have been denied");
        assert!(RateLimiter::retry_after_secs(&denied, Utc::now()) <= 60);
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_windows() {
        let store = Arc::new(MemoryMeteringStore::new());
        let limiter = RateLimiter::new(store);

        let a = limiter.allow(Uuid::new_v4(), 1, 0).await.unwrap();
        let b = limiter.allow(Uuid::new_v4(), 1, 0).await.unwrap();
        assert!(a.allowed);
        assert!(b.allowed);
    }
}
