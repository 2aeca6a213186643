use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use apigate_core::{Key, Plan, PrincipalStore, StoreError, User};

/// In-memory [`PrincipalStore`], keyed by entity id with a secondary
/// prefix index for key lookups. Intended for tests and single-replica
/// deployments; `apigate-state-postgres` is the durable, multi-replica
/// binding.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    users: DashMap<Uuid, User>,
    keys: DashMap<Uuid, Key>,
    /// prefix -> key ids sharing it (collisions are permitted).
    keys_by_prefix: DashMap<String, Vec<Uuid>>,
    plans: DashMap<Uuid, Plan>,
}

impl MemoryPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn insert_key(&self, key: Key) {
        self.keys_by_prefix
            .entry(key.prefix.clone())
            .or_default()
            .push(key.id);
        self.keys.insert(key.id, key);
    }

    /// Insert a plan, clearing `is_default` on any existing plan first if
    /// this one is the new default — at most one default plan at a time.
    pub fn insert_plan(&self, mut plan: Plan) {
        if plan.is_default {
            for mut existing in self.plans.iter_mut() {
                existing.is_default = false;
            }
        }
        if plan.id == Uuid::nil() {
            plan.id = Uuid::new_v4();
        }
        self.plans.insert(plan.id, plan);
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn get_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.users.get(&id).map(|e| e.clone()).ok_or(StoreError::NotFound)
    }

    async fn find_keys_by_prefix(&self, prefix: &str) -> Result<Vec<Key>, StoreError> {
        let Some(ids) = self.keys_by_prefix.get(prefix) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.keys.get(id).map(|e| e.clone()))
            .collect())
    }

    async fn get_key(&self, id: Uuid) -> Result<Key, StoreError> {
        self.keys.get(&id).map(|e| e.clone()).ok_or(StoreError::NotFound)
    }

    async fn update_key_last_used(&self, key_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.keys
            .get_mut(&key_id)
            .map(|mut e| e.last_used = Some(now))
            .ok_or(StoreError::NotFound)
    }

    async fn get_plan(&self, id: Uuid) -> Result<Plan, StoreError> {
        self.plans.get(&id).map(|e| e.clone()).ok_or(StoreError::NotFound)
    }

    async fn get_default_plan(&self) -> Result<Plan, StoreError> {
        self.plans
            .iter()
            .find(|e| e.is_default)
            .map(|e| e.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, StoreError> {
        Ok(self.plans.iter().map(|e| e.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_state::{fixture_key, fixture_plan, fixture_user};

    #[tokio::test]
    async fn conformance_suite_passes() {
        let store = MemoryPrincipalStore::new();
        store.insert_plan(fixture_plan(true));
        apigate_state::run_principal_store_conformance(&store).await.unwrap();
    }

    #[tokio::test]
    async fn prefix_collisions_return_all_candidates() {
        let store = MemoryPrincipalStore::new();
        let plan = fixture_plan(true);
        store.insert_plan(plan.clone());
        let user = fixture_user(plan.id);
        store.insert_user(user.clone());
        store.insert_key(fixture_key(user.id, "ak_coll", "hash-a"));
        store.insert_key(fixture_key(user.id, "ak_coll", "hash-b"));

        let candidates = store.find_keys_by_prefix("ak_coll").await.unwrap();
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn inserting_new_default_plan_clears_previous_default() {
        let store = MemoryPrincipalStore::new();
        let first = fixture_plan(true);
        store.insert_plan(first.clone());
        let second = fixture_plan(true);
        store.insert_plan(second.clone());

        let default = store.get_default_plan().await.unwrap();
        assert_eq!(default.id, second.id);

        let plans = store.list_plans().await.unwrap();
        assert_eq!(plans.iter().filter(|p| p.is_default).count(), 1);
    }

    #[tokio::test]
    async fn update_last_used_persists() {
        let store = MemoryPrincipalStore::new();
        let plan = fixture_plan(true);
        store.insert_plan(plan.clone());
        let user = fixture_user(plan.id);
        store.insert_user(user.clone());
        let key = fixture_key(user.id, "ak_x", "hash");
        store.insert_key(key.clone());

        let now = Utc::now();
        store.update_key_last_used(key.id, now).await.unwrap();
        let fetched = store.get_key(key.id).await.unwrap();
        assert_eq!(fetched.last_used, Some(now));
    }
}
