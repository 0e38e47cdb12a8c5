//! Runtime wiring and lifecycle.
//!
//! Builds the event bus, coherence engine, optimistic update manager, and
//! background refresher as one explicitly constructed unit with an
//! `init`/`dispose` lifecycle, so tests and embedders can run isolated
//! instances side by side.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::CoherenceConfig;
use crate::engine::CoherenceEngine;
use crate::events::{DomainEvent, EventBus, EventKind, Subscription};
use crate::keys::{BaseKey, CacheRegion};
use crate::optimistic::OptimisticUpdateManager;
use crate::refresh::{BackgroundRefresher, RefreshTask};
use crate::store::CacheStore;

/// Regions loaded ahead of first render by [`CoherenceRuntime::prefetch_critical`].
const CRITICAL_KEYS: [BaseKey; 4] = [
    BaseKey::FinancialDashboard,
    BaseKey::FinancialClients,
    BaseKey::KpiSummary,
    BaseKey::EnhancedNotifications,
];

/// One fully wired coherence instance.
///
/// The engine is attached to the bus as a wildcard subscriber: publishing an
/// event through any of the trigger methods drives invalidation
/// fire-and-forget. Requires a running Tokio runtime.
pub struct CoherenceRuntime {
    store: Arc<dyn CacheStore>,
    bus: Arc<EventBus>,
    engine: Arc<CoherenceEngine>,
    optimistic: OptimisticUpdateManager,
    refresher: Arc<BackgroundRefresher>,
    engine_subscription: Subscription,
    refresh_task: Option<RefreshTask>,
}

impl CoherenceRuntime {
    /// Construct and wire all components against one store.
    pub fn init(config: CoherenceConfig, store: Arc<dyn CacheStore>) -> Self {
        let bus = Arc::new(EventBus::with_capacity(
            config.history_capacity_non_zero().get(),
        ));
        let engine = Arc::new(CoherenceEngine::new(Arc::clone(&store)));
        let engine_subscription = engine.attach(&bus);
        let optimistic = OptimisticUpdateManager::new(Arc::clone(&store));
        let refresher = Arc::new(BackgroundRefresher::new(
            Arc::clone(&store),
            config.refresh_tiers.clone(),
            config.refresh_interval(),
        ));
        let refresh_task = config
            .enable_background_refresh
            .then(|| Arc::clone(&refresher).start());

        info!(
            background_refresh = refresh_task.is_some(),
            "coherence runtime initialized"
        );

        Self {
            store,
            bus,
            engine,
            optimistic,
            refresher,
            engine_subscription,
            refresh_task,
        }
    }

    /// Ask the fetch layer to load the always-visible regions ahead of first
    /// render (startup warm-up).
    pub async fn prefetch_critical(&self) {
        join_all(CRITICAL_KEYS.iter().map(|base| async move {
            let region = CacheRegion::unscoped(*base);
            if let Err(error) = self.store.prefetch(&region).await {
                warn!(region = %region, error = %error, "critical prefetch failed");
            }
        }))
        .await;
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<CoherenceEngine> {
        &self.engine
    }

    pub fn optimistic(&self) -> &OptimisticUpdateManager {
        &self.optimistic
    }

    pub fn refresher(&self) -> &Arc<BackgroundRefresher> {
        &self.refresher
    }

    /// Publish a portfolio update.
    pub fn portfolio_updated(&self, portfolio_id: &str, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::PortfolioUpdated {
            portfolio_id: portfolio_id.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// Publish a holding addition.
    pub fn holding_added(&self, portfolio_id: &str, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::HoldingAdded {
            portfolio_id: portfolio_id.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// Publish a client creation.
    pub fn client_created(&self, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::ClientCreated {
            client_id: client_id.to_string(),
        })
    }

    /// Publish a client update.
    pub fn client_updated(&self, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::ClientUpdated {
            client_id: client_id.to_string(),
        })
    }

    /// Publish a scenario calculation.
    pub fn scenario_calculated(
        &self,
        scenario_id: Option<&str>,
        client_id: Option<&str>,
    ) -> DomainEvent {
        self.bus.publish(EventKind::ScenarioCalculated {
            scenario_id: scenario_id.map(str::to_string),
            client_id: client_id.map(str::to_string),
        })
    }

    /// Publish a task completion.
    pub fn task_completed(&self, task_id: &str, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::TaskCompleted {
            task_id: task_id.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// Publish a task creation.
    pub fn task_created(&self, task_id: &str, client_id: &str) -> DomainEvent {
        self.bus.publish(EventKind::TaskCreated {
            task_id: task_id.to_string(),
            client_id: client_id.to_string(),
        })
    }

    /// Publish a pipeline stage move.
    pub fn pipeline_moved(&self, client_id: &str, from_stage: &str, to_stage: &str) -> DomainEvent {
        self.bus.publish(EventKind::PipelineMoved {
            client_id: client_id.to_string(),
            from_stage: from_stage.to_string(),
            to_stage: to_stage.to_string(),
        })
    }

    /// Publish a KPI recomputation.
    pub fn kpi_updated(&self, metrics: Vec<String>) -> DomainEvent {
        self.bus.publish(EventKind::KpiUpdated { metrics })
    }

    /// Publish an informational notification.
    pub fn notification_triggered(&self, message: &str) -> DomainEvent {
        self.bus.publish(EventKind::NotificationTriggered {
            message: message.to_string(),
        })
    }

    /// Run one deduplicated invalidation pass for several simultaneous
    /// changes (e.g. a bulk import).
    ///
    /// Goes to the engine directly, not through the bus, so the attached
    /// listener does not also invalidate per event.
    pub async fn invalidate_batch(&self, kinds: Vec<EventKind>) {
        let events: Vec<DomainEvent> = kinds
            .into_iter()
            .map(|kind| DomainEvent::new(kind, self.bus.next_epoch()))
            .collect();
        self.engine.invalidate_for_batch(&events).await;
    }

    /// Tear the instance down: stop the refresh loop, detach the engine,
    /// and drop all subscriptions and history.
    pub fn dispose(mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.stop();
        }
        self.engine_subscription.unsubscribe();
        self.bus.clear();
        info!("coherence runtime disposed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::keys::{BaseKey, CacheRegion};
    use crate::store::{MemoryStore, RegionStatus};

    fn quiet_config() -> CoherenceConfig {
        CoherenceConfig {
            enable_background_refresh: false,
            ..Default::default()
        }
    }

    fn init_runtime() -> (CoherenceRuntime, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let runtime = CoherenceRuntime::init(quiet_config(), store.clone() as Arc<dyn CacheStore>);
        (runtime, store)
    }

    #[tokio::test]
    async fn trigger_methods_record_history() {
        let (runtime, _store) = init_runtime();

        runtime.client_created("c1");
        runtime.kpi_updated(vec!["aum".to_string()]);

        let history = runtime.bus().history();
        assert_eq!(history.len(), 2);

        runtime.dispose();
    }

    #[tokio::test]
    async fn published_event_invalidates_mapped_regions() {
        let (runtime, store) = init_runtime();
        let clients = CacheRegion::unscoped(BaseKey::FinancialClients);
        store.set(&clients, json!(["c0"]));

        runtime.client_created("c1");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.status(&clients), Some(RegionStatus::Stale));

        runtime.dispose();
    }

    #[tokio::test]
    async fn disposed_runtime_stops_invalidating() {
        let (runtime, store) = init_runtime();
        let bus = Arc::clone(runtime.bus());
        let clients = CacheRegion::unscoped(BaseKey::FinancialClients);
        store.set(&clients, json!(["c0"]));

        runtime.dispose();
        bus.publish(EventKind::ClientCreated {
            client_id: "c1".to_string(),
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.status(&clients), Some(RegionStatus::Fresh));
    }

    #[tokio::test]
    async fn prefetch_critical_requests_loads_for_missing_regions() {
        let (runtime, store) = init_runtime();
        // kpi-summary is already cached and fresh; the other three are not.
        let kpi = CacheRegion::unscoped(BaseKey::KpiSummary);
        store.set(&kpi, json!(1));

        runtime.prefetch_critical().await;

        assert_eq!(store.refetch_count(&kpi), 0);
        assert_eq!(
            store.refetch_count(&CacheRegion::unscoped(BaseKey::FinancialDashboard)),
            1
        );
        assert_eq!(
            store.refetch_count(&CacheRegion::unscoped(BaseKey::FinancialClients)),
            1
        );
        assert_eq!(
            store.refetch_count(&CacheRegion::unscoped(BaseKey::EnhancedNotifications)),
            1
        );

        runtime.dispose();
    }

    #[tokio::test]
    async fn batch_path_does_not_double_invalidate() {
        let (runtime, store) = init_runtime();
        let kpi = CacheRegion::unscoped(BaseKey::KpiSummary);
        store.set(&kpi, json!(1));
        store.get(&kpi); // observe

        runtime
            .invalidate_batch(vec![
                EventKind::PortfolioUpdated {
                    portfolio_id: "p1".to_string(),
                    client_id: "c1".to_string(),
                },
                EventKind::HoldingAdded {
                    portfolio_id: "p1".to_string(),
                    client_id: "c1".to_string(),
                },
            ])
            .await;

        // One merged pass: kpi-summary goes stale once, one refetch.
        assert_eq!(store.status(&kpi), Some(RegionStatus::Stale));
        assert_eq!(store.refetch_count(&kpi), 1);

        runtime.dispose();
    }
}
