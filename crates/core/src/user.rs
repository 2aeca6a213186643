use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a `User`.
///
/// `Suspended` causes [`crate::PrincipalStore`] consumers (the authenticator)
/// to reject all of the user's keys; `Deleted` is a tombstone — the row is
/// kept for referential integrity but never resolves successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Deleted,
}

/// A registered principal. Owns zero or more [`crate::Key`]s and has at most
/// one active subscription, referenced here by `plan_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub plan_id: Uuid,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.status, UserStatus::Active)
    }
}
