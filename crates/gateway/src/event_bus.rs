//! An in-process [`EventBus`] binding: a `parking_lot::RwLock`-guarded
//! handler list. `publish` fans out synchronously but never blocks the
//! request path on a slow subscriber — handlers are expected to be cheap
//! (route-cache invalidation) or to `tokio::spawn` their own async work
//! (the webhook engine's publish, wired by `apigate-server`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use apigate_core::{Event, EventBus, Subscription};

type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct InProcessEventBus {
    handlers: Arc<RwLock<Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl InProcessEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct InProcessSubscription {
    id: u64,
    handlers: Arc<RwLock<Vec<(u64, Handler)>>>,
}

impl Subscription for InProcessSubscription {
    fn unsubscribe(&self) {
        self.handlers.write().retain(|(id, _)| *id != self.id);
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    async fn publish(&self, event: Event) {
        let handlers = self.handlers.read();
        for (_, handler) in handlers.iter() {
            handler(&event);
        }
    }

    fn subscribe(&self, handler: Box<dyn Fn(&Event) + Send + Sync>) -> Box<dyn Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, handler));
        Box::new(InProcessSubscription { id, handlers: Arc::clone(&self.handlers) })
    }
}
