use std::collections::HashSet;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventType;

/// A registered delivery target for one or more [`EventType`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    /// Empty means global scope: the webhook receives every matching event
    /// regardless of `user_id`.
    pub user_id: Option<Uuid>,
    pub url: String,
    #[serde(with = "secret_string_serde")]
    pub secret: SecretString,
    pub events: HashSet<EventType>,
    pub retry_count: u32,
    pub timeout_ms: u64,
    pub enabled: bool,
}

impl Webhook {
    /// Returns `true` if this webhook should receive `event_type` raised for
    /// `event_user_id` (`None` for a system-level event).
    #[must_use]
    pub fn subscribes_to(&self, event_type: EventType, event_user_id: Option<Uuid>) -> bool {
        if !self.enabled || !self.events.contains(&event_type) {
            return false;
        }
        match self.user_id {
            None => true,
            Some(owner) => event_user_id == Some(owner),
        }
    }
}

/// The lifecycle state of one [`WebhookDelivery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Success,
    Failed,
}

/// One attempt (and its history) to POST an event payload to one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_id: Uuid,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status_code: Option<u16>,
    /// Truncated to at most 1 KiB.
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
    pub next_retry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum length, in bytes, a captured response body is truncated to.
pub const RESPONSE_BODY_TRUNCATE_LIMIT: usize = 1024;

impl WebhookDelivery {
    /// Truncate `body` to [`RESPONSE_BODY_TRUNCATE_LIMIT`] bytes at a
    /// UTF-8-safe boundary.
    #[must_use]
    pub fn truncate_response_body(body: &str) -> String {
        if body.len() <= RESPONSE_BODY_TRUNCATE_LIMIT {
            return body.to_owned();
        }
        let mut end = RESPONSE_BODY_TRUNCATE_LIMIT;
        while end > 0 && !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_owned()
    }

    /// Returns `true` if this status code warrants a retry: request
    /// timeouts, rate limiting, or any server error.
    #[must_use]
    pub fn is_retryable_status(status_code: u16) -> bool {
        matches!(status_code, 408 | 429) || status_code >= 500
    }

    /// `true` once the delivery has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

mod secret_string_serde {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &SecretString, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SecretString, D::Error> {
        Ok(SecretString::from(String::deserialize(d)?))
    }
}
