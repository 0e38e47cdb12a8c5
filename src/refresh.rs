//! Tiered background refresh.
//!
//! A safety net against missed or mis-mapped invalidations and externally
//! caused drift: a fixed partition of base keys into priority tiers is
//! re-validated on a timer, independent of any event. Only regions a
//! consumer currently observes are refetched; the rest go stale and reload
//! lazily on their next read.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::keys::{BaseKey, CacheRegion};
use crate::store::CacheStore;

/// Refresh priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Fixed partition of base keys into refresh tiers.
///
/// The default partition puts the always-visible dashboard surfaces in the
/// high tier, primary work lists in the medium tier, and slow-moving data in
/// the low tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshTiers {
    pub high: Vec<BaseKey>,
    pub medium: Vec<BaseKey>,
    pub low: Vec<BaseKey>,
}

impl Default for RefreshTiers {
    fn default() -> Self {
        Self {
            high: vec![
                BaseKey::FinancialDashboard,
                BaseKey::KpiSummary,
                BaseKey::EnhancedNotifications,
                BaseKey::OverdueTasks,
            ],
            medium: vec![
                BaseKey::FinancialClients,
                BaseKey::PipelineOverview,
                BaseKey::ComplianceTasks,
            ],
            low: vec![BaseKey::KpiHistorical, BaseKey::TaskTemplates],
        }
    }
}

impl RefreshTiers {
    pub fn keys(&self, priority: Priority) -> &[BaseKey] {
        match priority {
            Priority::High => &self.high,
            Priority::Medium => &self.medium,
            Priority::Low => &self.low,
        }
    }
}

/// Periodically re-validates cache regions by tier.
///
/// Performs no event correlation; the scheduled loop touches only the high
/// tier, while `tick` lets hosts refresh any tier combination on demand.
pub struct BackgroundRefresher {
    store: Arc<dyn CacheStore>,
    tiers: RefreshTiers,
    interval: Duration,
}

impl BackgroundRefresher {
    pub fn new(store: Arc<dyn CacheStore>, tiers: RefreshTiers, interval: Duration) -> Self {
        Self {
            store,
            tiers,
            interval,
        }
    }

    pub fn tiers(&self) -> &RefreshTiers {
        &self.tiers
    }

    /// Invalidate every base key of the given tiers, as unscoped regions,
    /// active-only. Tiers run in the supplied order; keys within a tier run
    /// concurrently; failures are logged and isolated.
    pub async fn tick(&self, priorities: &[Priority]) {
        for priority in priorities {
            let keys = self.tiers.keys(*priority);
            let results = join_all(keys.iter().map(|base| async move {
                let region = CacheRegion::unscoped(*base);
                let result = self.store.invalidate(&region, true).await;
                (region, result)
            }))
            .await;

            for (region, result) in results {
                if let Err(error) = result {
                    warn!(region = %region, error = %error, "background refresh failed");
                }
            }
            debug!(priority = ?priority, keys = keys.len(), "refresh tier complete");
        }
    }

    /// Spawn the periodic loop: the high tier only, every `interval`.
    ///
    /// Requires a running Tokio runtime. The returned task stops the loop on
    /// [`RefreshTask::stop`] or on drop; an in-flight tick is not cancelled
    /// mid-region.
    pub fn start(self: Arc<Self>) -> RefreshTask {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval completes immediately;
            // consume it so the loop waits a full period before refreshing.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick(&[Priority::High]).await;
            }
        });
        RefreshTask { handle }
    }
}

/// Handle owning a running refresh loop.
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Stop the loop. Idempotent.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::{MemoryStore, RegionStatus};

    fn refresher(interval_ms: u64) -> (Arc<BackgroundRefresher>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let refresher = Arc::new(BackgroundRefresher::new(
            store.clone() as Arc<dyn CacheStore>,
            RefreshTiers::default(),
            Duration::from_millis(interval_ms),
        ));
        (refresher, store)
    }

    fn seed_fresh(store: &MemoryStore, base: BaseKey, observe: bool) -> CacheRegion {
        let region = CacheRegion::unscoped(base);
        store.set(&region, json!({"seed": base.as_str()}));
        if observe {
            store.get(&region);
        }
        region
    }

    #[tokio::test]
    async fn tick_invalidates_only_requested_tiers() {
        let (refresher, store) = refresher(30_000);
        let high = seed_fresh(&store, BaseKey::KpiSummary, true);
        let medium = seed_fresh(&store, BaseKey::FinancialClients, true);

        refresher.tick(&[Priority::High]).await;

        assert_eq!(store.status(&high), Some(RegionStatus::Stale));
        assert_eq!(store.status(&medium), Some(RegionStatus::Fresh));
    }

    #[tokio::test]
    async fn tick_refetches_observed_regions_only() {
        let (refresher, store) = refresher(30_000);
        let observed = seed_fresh(&store, BaseKey::FinancialDashboard, true);
        let unobserved = seed_fresh(&store, BaseKey::KpiSummary, false);

        refresher.tick(&[Priority::High]).await;

        assert_eq!(store.refetch_count(&observed), 1);
        assert_eq!(store.refetch_count(&unobserved), 0);
        assert_eq!(store.status(&unobserved), Some(RegionStatus::Stale));
    }

    #[tokio::test]
    async fn tick_processes_multiple_tiers() {
        let (refresher, store) = refresher(30_000);
        let medium = seed_fresh(&store, BaseKey::ComplianceTasks, false);
        let low = seed_fresh(&store, BaseKey::TaskTemplates, false);

        refresher.tick(&[Priority::Medium, Priority::Low]).await;

        assert_eq!(store.status(&medium), Some(RegionStatus::Stale));
        assert_eq!(store.status(&low), Some(RegionStatus::Stale));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_loop_refreshes_high_tier() {
        let (refresher, store) = refresher(100);
        let high = seed_fresh(&store, BaseKey::KpiSummary, false);

        let task = refresher.start();

        // Nothing happens before the first full period elapses.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.status(&high), Some(RegionStatus::Fresh));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.status(&high), Some(RegionStatus::Stale));

        task.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_loop_refreshes_no_more() {
        let (refresher, store) = refresher(100);
        let high = seed_fresh(&store, BaseKey::KpiSummary, false);

        let task = refresher.start();
        task.stop();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.status(&high), Some(RegionStatus::Fresh));
    }
}
