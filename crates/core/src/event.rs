use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named domain event the core emits or consumes over the [`EventBus`].
///
/// `route.*`/`upstream.*`/`plan.changed` drive the router's config-cache
/// rebuild; `key.*` and `usage.*` are published for `apigate-webhook`
/// subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    KeyCreated,
    KeyRevoked,
    RouteCreated,
    RouteUpdated,
    RouteDeleted,
    UpstreamCreated,
    UpstreamUpdated,
    UpstreamDeleted,
    PlanChanged,
    UsageThreshold,
    UsageLimit,
}

impl EventType {
    /// `true` if this event kind should trigger the router's config-cache
    /// rebuild.
    #[must_use]
    pub fn invalidates_route_cache(self) -> bool {
        matches!(
            self,
            Self::RouteCreated
                | Self::RouteUpdated
                | Self::RouteDeleted
                | Self::UpstreamCreated
                | Self::UpstreamUpdated
                | Self::UpstreamDeleted
        )
    }
}

/// An occurrence of an [`EventType`], carrying whatever JSON payload the
/// publisher attached plus the identity of the user it's scoped to, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub user_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    #[must_use]
    pub fn new(event_type: EventType, user_id: Option<Uuid>, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            user_id,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// A handle passed to subscribers when they register with an [`EventBus`].
/// Dropping it (or calling [`Subscription::unsubscribe`]) stops delivery.
pub trait Subscription: Send + Sync {
    fn unsubscribe(&self);
}

/// Publishes and consumes named [`Event`]s.
///
/// Concrete bindings may be in-process (an `mpsc`/broadcast fan-out, used by
/// `apigate-gateway`'s in-process router cache) or externally backed; the
/// core depends only on this trait.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `event` to all current subscribers. Never blocks on a slow
    /// subscriber long enough to affect the request path that triggered it.
    async fn publish(&self, event: Event);

    /// Register a callback invoked for every published event. Returns a
    /// handle that can be used to unsubscribe.
    fn subscribe(&self, handler: Box<dyn Fn(&Event) + Send + Sync>) -> Box<dyn Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_events_invalidate_cache() {
        assert!(EventType::RouteCreated.invalidates_route_cache());
        assert!(EventType::UpstreamDeleted.invalidates_route_cache());
        assert!(!EventType::KeyCreated.invalidates_route_cache());
        assert!(!EventType::UsageThreshold.invalidates_route_cache());
    }

    #[test]
    fn event_new_stamps_timestamp_and_id() {
        let event = Event::new(EventType::KeyRevoked, Some(Uuid::new_v4()), serde_json::json!({}));
        assert_eq!(event.event_type, EventType::KeyRevoked);
        assert!(event.user_id.is_some());
    }
}
