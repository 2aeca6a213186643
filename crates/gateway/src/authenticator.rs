//! Credential resolution.
//!
//! Verification runs argon2 (`apigate-crypto::verify_key`) over every
//! candidate sharing the presented key's prefix — prefix collisions are
//! permitted and resolved by checking each candidate's hash.
//! The best-effort `last_used` bump is dispatched onto its own `tokio::spawn`
//! so a slow `PrincipalStore` write never adds latency to the request path.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use apigate_core::{Key, Plan, PrincipalStore, User};

use crate::error::{AuthRejectReason, GatewayError};

/// `(user, key, plan)` — the authenticator's successful resolution.
pub struct Principal {
    pub user: User,
    pub key: Key,
    pub plan: Plan,
}

/// The number of leading characters of a presented key used as the
/// `PrincipalStore::find_keys_by_prefix` lookup index (`Key.prefix`).
pub const KEY_PREFIX_LEN: usize = 12;

pub struct Authenticator {
    store: Arc<dyn PrincipalStore>,
}

impl Authenticator {
    #[must_use]
    pub fn new(store: Arc<dyn PrincipalStore>) -> Self {
        Self { store }
    }

    /// Resolve a presented credential string to a [`Principal`], per
    /// validation order: key found -> not revoked/expired ->
    /// user active -> plan resolvable.
    ///
    /// # Errors
    /// Returns [`GatewayError::AuthRejected`] for every rejection reason; the
    /// caller maps that to a 401/403.
    pub async fn authenticate(&self, credential: &str) -> Result<Principal, GatewayError> {
        let prefix = apigate_crypto::key_prefix(credential, KEY_PREFIX_LEN);
        let candidates = self.store.find_keys_by_prefix(&prefix).await?;

        let key = candidates
            .into_iter()
            .find(|candidate| apigate_crypto::verify_key(expose(&candidate.hash), credential))
            .ok_or(GatewayError::AuthRejected(AuthRejectReason::Unknown))?;

        let now = Utc::now();
        if !key.is_usable(now) {
            let reason = if key.revoked_at.is_some() {
                AuthRejectReason::Revoked
            } else {
                AuthRejectReason::Expired
            };
            return Err(GatewayError::AuthRejected(reason));
        }

        let user = self.store.get_user(key.user_id).await?;
        match user.status {
            apigate_core::UserStatus::Active => {}
            apigate_core::UserStatus::Suspended => {
                return Err(GatewayError::AuthRejected(AuthRejectReason::Suspended))
            }
            apigate_core::UserStatus::Deleted => {
                return Err(GatewayError::AuthRejected(AuthRejectReason::Deleted))
            }
        }

        let plan = match self.store.get_plan(user.plan_id).await {
            Ok(plan) => plan,
            Err(_) => self
                .store
                .get_default_plan()
                .await
                .map_err(|_| GatewayError::AuthRejected(AuthRejectReason::NoPlan))?,
        };

        self.spawn_last_used_update(key.id, now);

        Ok(Principal { user, key, plan })
    }

    /// Fire-and-forget `last_used` bump; never fails the request.
    fn spawn_last_used_update(&self, key_id: uuid::Uuid, now: chrono::DateTime<Utc>) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(e) = store.update_key_last_used(key_id, now).await {
                warn!(key_id = %key_id, error = %e, "failed to record key last_used (best-effort)");
            }
        });
    }
}

/// Extract one credential string from the request's auth headers:
/// `Authorization: Bearer …`, else the configured API key header.
#[must_use]
pub fn extract_credential(headers: &[(String, String)], api_key_header: &str) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .and_then(|(_, value)| value.strip_prefix("Bearer ").map(str::to_owned))
        .or_else(|| {
            headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(api_key_header))
                .map(|(_, value)| value.clone())
        })
}

fn expose(hash: &secrecy::SecretString) -> &str {
    use secrecy::ExposeSecret;
    hash.expose_secret()
}

#[cfg(test)]
mod tests {
    use apigate_state::{fixture_key, fixture_plan, fixture_user};
    use apigate_state_memory::MemoryPrincipalStore;

    use super::*;

    fn store_with_key(plaintext: &str) -> (Arc<MemoryPrincipalStore>, uuid::Uuid) {
        let store = Arc::new(MemoryPrincipalStore::new());
        let plan = fixture_plan(true);
        store.insert_plan(plan.clone());
        let user = fixture_user(plan.id);
        store.insert_user(user.clone());

        let hash = apigate_crypto::hash_key(plaintext).unwrap();
        let prefix = apigate_crypto::key_prefix(plaintext, KEY_PREFIX_LEN);
        let key = fixture_key(user.id, &prefix, &hash);
        store.insert_key(key);
        (store, user.id)
    }

    #[tokio::test]
    async fn happy_path_resolves_principal() {
        let (store, user_id) = store_with_key("ak_test12345");
        let auth = Authenticator::new(store);
        let principal = auth.authenticate("ak_test12345").await.unwrap();
        assert_eq!(principal.user.id, user_id);
    }

    #[tokio::test]
    async fn unknown_key_rejected() {
        let (store, _) = store_with_key("ak_test12345");
        let auth = Authenticator::new(store);
        let err = auth.authenticate("ak_wrong_key_99").await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthRejected(AuthRejectReason::Unknown)));
    }

    #[tokio::test]
    async fn revoked_key_rejected() {
        let (store, _) = store_with_key("ak_test12345");
        let prefix = apigate_crypto::key_prefix("ak_test12345", KEY_PREFIX_LEN);
        let mut key = store.find_keys_by_prefix(&prefix).await.unwrap().remove(0);
        key.revoked_at = Some(Utc::now());
        store.insert_key(key);

        let auth = Authenticator::new(store);
        let err = auth.authenticate("ak_test12345").await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthRejected(AuthRejectReason::Revoked)));
    }

    #[tokio::test]
    async fn suspended_user_rejected() {
        let (store, user_id) = store_with_key("ak_test12345");
        let mut user = store.get_user(user_id).await.unwrap();
        user.status = apigate_core::UserStatus::Suspended;
        store.insert_user(user);

        let auth = Authenticator::new(store);
        let err = auth.authenticate("ak_test12345").await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthRejected(AuthRejectReason::Suspended)));
    }

    #[test]
    fn extract_credential_prefers_bearer_then_header() {
        let headers = vec![("Authorization".to_owned(), "Bearer ak_123".to_owned())];
        assert_eq!(extract_credential(&headers, "X-API-Key").as_deref(), Some("ak_123"));

        let headers = vec![("X-API-Key".to_owned(), "ak_456".to_owned())];
        assert_eq!(extract_credential(&headers, "X-API-Key").as_deref(), Some("ak_456"));

        assert_eq!(extract_credential(&[], "X-API-Key"), None);
    }
}
