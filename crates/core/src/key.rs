use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An API credential issued to a [`crate::User`].
///
/// The plaintext key is never stored — only an argon2 hash of it. `prefix`
/// holds the first few characters of the plaintext key and is the indexed
/// lookup field; collisions on the prefix are resolved by verifying the full
/// candidate string against `hash` (see `apigate-gateway`'s authenticator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(with = "secret_string_serde")]
    pub hash: SecretString,
    pub prefix: String,
    pub name: String,
    /// Path-glob patterns this key is scoped to. Empty means unrestricted.
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Key {
    /// Returns `true` if this key may still authenticate: not revoked, and
    /// not expired as of `now`.
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }

    /// Returns `true` if `path` matches one of this key's scopes, or the key
    /// is unscoped.
    #[must_use]
    pub fn covers_path(&self, path: &str) -> bool {
        self.scopes.is_empty()
            || self
                .scopes
                .iter()
                .any(|pattern| glob_match_prefix(pattern, path))
    }
}

/// Minimal glob matcher supporting a single trailing `*`, enough for path
/// scopes like `/v1/items*`. Patterns without a wildcard require an exact
/// match.
fn glob_match_prefix(pattern: &str, path: &str) -> bool {
    pattern
        .strip_suffix('*')
        .map_or_else(|| pattern == path, |prefix| path.starts_with(prefix))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_path_unscoped() {
        let key = test_key(vec![]);
        assert!(key.covers_path("/anything"));
    }

    #[test]
    fn covers_path_wildcard() {
        let key = test_key(vec!["/v1/items*".to_owned()]);
        assert!(key.covers_path("/v1/items/42"));
        assert!(!key.covers_path("/v1/orders"));
    }

    #[test]
    fn covers_path_exact() {
        let key = test_key(vec!["/v1/health".to_owned()]);
        assert!(key.covers_path("/v1/health"));
        assert!(!key.covers_path("/v1/health/deep"));
    }

    #[test]
    fn is_usable_respects_revocation_and_expiry() {
        let now = Utc::now();
        let mut key = test_key(vec![]);
        assert!(key.is_usable(now));

        key.revoked_at = Some(now);
        assert!(!key.is_usable(now));
        key.revoked_at = None;

        key.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!key.is_usable(now));
    }

    fn test_key(scopes: Vec<String>) -> Key {
        Key {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            hash: SecretString::from("argon2-hash".to_owned()),
            prefix: "ak_test".to_owned(),
            name: "test".to_owned(),
            scopes,
            expires_at: None,
            revoked_at: None,
            last_used: None,
            created_at: Utc::now(),
        }
    }
}
