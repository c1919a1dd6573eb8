use std::sync::Arc;

use tracing::info;

use tilecast_core::Config;
use tilecast_live::{
    BroadcastHub, HealthMonitor, QueryExecutor, RefreshScheduler, ResultCache, Subscriber, SubscriberRegistry, TemplateStore,
};

/// Shared state behind every handler and the background loops.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn TemplateStore>,
    pub hub: Arc<BroadcastHub>,
    pub scheduler: RefreshScheduler,
    pub monitor: HealthMonitor,
}

impl AppState {
    /// Wire the live subsystem around the given collaborators. Nothing is
    /// started yet.
    pub fn new(config: Config, store: Arc<dyn TemplateStore>, executor: Arc<dyn QueryExecutor>) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let cache = Arc::new(ResultCache::new());
        let hub = Arc::new(BroadcastHub::new(registry.clone(), cache, &config.live));
        let scheduler = RefreshScheduler::new(store.clone(), executor, hub.clone(), config.scheduler.clone());
        let monitor = HealthMonitor::new(registry, &config.live);
        Self {
            config,
            store,
            hub,
            scheduler,
            monitor,
        }
    }

    pub fn start_background(&self) {
        self.scheduler.start();
        self.monitor.start();
    }

    /// Stop both loops, then drop every subscriber so open sockets close.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.monitor.stop().await;

        let subscribers = self.hub.registry().snapshot();
        for subscriber in &subscribers {
            self.hub.disconnect(subscriber.id());
        }
        info!(closed = subscribers.len(), "live subscribers closed");
    }
}
