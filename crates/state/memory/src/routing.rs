use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use apigate_core::{Route, RoutingStore, StoreError, Upstream};

/// In-memory [`RoutingStore`]. Routes/upstreams change rarely; the gateway
/// reads this once at startup (and on config-change events) and caches the
/// result.
#[derive(Debug, Default)]
pub struct MemoryRoutingStore {
    routes: DashMap<Uuid, Route>,
    upstreams: DashMap<Uuid, Upstream>,
}

impl MemoryRoutingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_route(&self, route: Route) {
        self.routes.insert(route.id, route);
    }

    pub fn insert_upstream(&self, upstream: Upstream) {
        self.upstreams.insert(upstream.id, upstream);
    }

    pub fn remove_route(&self, id: Uuid) {
        self.routes.remove(&id);
    }
}

#[async_trait]
impl RoutingStore for MemoryRoutingStore {
    async fn list_enabled_routes(&self) -> Result<Vec<Route>, StoreError> {
        Ok(self
            .routes
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.clone())
            .collect())
    }

    async fn get_upstream(&self, id: Uuid) -> Result<Upstream, StoreError> {
        self.upstreams.get(&id).map(|e| e.clone()).ok_or(StoreError::NotFound)
    }

    async fn list_upstreams(&self) -> Result<Vec<Upstream>, StoreError> {
        Ok(self.upstreams.iter().map(|e| e.clone()).collect())
    }
}
