//! Data model, storage port contracts, and event bus abstraction shared by
//! every APIGate crate.
//!
//! This crate has no I/O of its own: it defines the entities in the data
//! model, the three storage port traits (`PrincipalStore`, `RoutingStore`,
//! `MeteringStore`) concrete backends implement, and the `EventBus` trait
//! used to propagate configuration-change and usage-threshold events.

mod error;
mod event;
mod key;
mod plan;
mod ports;
mod route;
mod upstream;
mod usage;
mod user;
mod webhook;

pub use error::StoreError;
pub use event::{Event, EventBus, EventType, Subscription};
pub use key::Key;
pub use plan::{MeterType, Plan};
pub use ports::{MeteringStore, PrincipalStore, RoutingStore};
pub use route::{HeaderMatch, HostMatchType, MeteringMode, PathMatchType, Route, Transform};
pub use upstream::{AuthType, Upstream};
pub use usage::{QuotaCaps, QuotaState, RateLimitWindowState, UsageEvent, UsageSummary};
pub use user::{User, UserStatus};
pub use webhook::{DeliveryStatus, Webhook, WebhookDelivery, RESPONSE_BODY_TRUNCATE_LIMIT};

use chrono::{DateTime, Utc};

/// Truncate to the current minute boundary — the rate-limit window granularity.
#[must_use]
pub fn minute_window_end(now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::seconds(60)
}

/// Backoff schedule for webhook retries: attempt 1 -> +1m, 2 -> +5m, 3+ -> +30m.
#[must_use]
pub fn webhook_backoff(attempt: u32) -> chrono::Duration {
    match attempt {
        1 => chrono::Duration::minutes(1),
        2 => chrono::Duration::minutes(5),
        _ => chrono::Duration::minutes(30),
    }
}
