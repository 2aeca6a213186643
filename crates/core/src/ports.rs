use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::key::Key;
use crate::plan::Plan;
use crate::route::Route;
use crate::upstream::Upstream;
use crate::usage::{QuotaState, RateLimitWindowState, UsageEvent, UsageSummary};
use crate::user::User;
use crate::webhook::{Webhook, WebhookDelivery};

/// Users, keys, and plans — everything the authenticator needs to resolve a
/// presented credential to `(user, key, plan)`.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<User, StoreError>;

    /// Candidate keys sharing `prefix`. Normally one row; collisions are
    /// permitted and resolved by the caller verifying each candidate's hash.
    async fn find_keys_by_prefix(&self, prefix: &str) -> Result<Vec<Key>, StoreError>;

    async fn get_key(&self, id: Uuid) -> Result<Key, StoreError>;

    /// Best-effort; callers (the authenticator's background task) must not
    /// fail a request if this fails.
    async fn update_key_last_used(&self, key_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get_plan(&self, id: Uuid) -> Result<Plan, StoreError>;

    /// The catalog's single `is_default = true` plan, used as the
    /// authenticator's fallback when a user has no resolvable plan.
    async fn get_default_plan(&self) -> Result<Plan, StoreError>;

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError>;
}

/// Routes and upstreams — the router's configuration source, read once at
/// startup and refreshed on a config-change event.
#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn list_enabled_routes(&self) -> Result<Vec<Route>, StoreError>;

    async fn get_upstream(&self, id: Uuid) -> Result<Upstream, StoreError>;

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError>;
}

/// Rate-limit windows, quota counters, usage events/summaries, and webhook
/// deliveries — the stateful metering substrate.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    /// Load the current rate-limit window for `key_id`. `Ok(None)` means no
    /// row exists, semantically equivalent to a fresh window.
    async fn get_rate_limit_window(
        &self,
        key_id: Uuid,
    ) -> Result<Option<RateLimitWindowState>, StoreError>;

    /// Atomically store the new window state. Implementations must make
    /// this a single transaction (row lock or conditional upsert) so
    /// concurrent callers for the same `key_id` never interleave.
    async fn put_rate_limit_window(&self, state: RateLimitWindowState) -> Result<(), StoreError>;

    /// Delete rate-limit rows whose window ended before `before`.
    async fn cleanup_rate_limit_windows(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn get_quota_state(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<QuotaState>, StoreError>;

    /// Atomic upsert: insert `(user_id, period_start)` with the given deltas
    /// or add them to the existing row. Returns the row after the update.
    async fn consume_quota(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
        delta_requests: u64,
        delta_compute: u64,
        delta_bytes: u64,
    ) -> Result<QuotaState, StoreError>;

    /// Replace a quota row's counters with values aggregated from the usage
    /// log.
    async fn sync_quota_state(&self, summary: &UsageSummary) -> Result<QuotaState, StoreError>;

    async fn cleanup_quota_states(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    /// One transactional insert of a batch of events (the batcher's flush).
    async fn insert_usage_events(&self, events: &[UsageEvent]) -> Result<(), StoreError>;

    /// Events with `timestamp` in `[since, until)`, for rollup aggregation.
    async fn list_usage_events_since(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<UsageEvent>, StoreError>;

    async fn delete_usage_events_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn upsert_usage_summary(&self, summary: UsageSummary) -> Result<(), StoreError>;

    async fn get_usage_summary(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageSummary>, StoreError>;

    async fn list_webhooks(&self) -> Result<Vec<Webhook>, StoreError>;

    async fn insert_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError>;

    async fn update_webhook_delivery(&self, delivery: WebhookDelivery) -> Result<(), StoreError>;

    /// Deliveries ready for (re)dispatch: `pending`, or `retrying` with
    /// `next_retry <= now`.
    async fn list_due_webhook_deliveries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError>;
}
