//! Coherence engine: resolves domain events into region invalidations.
//!
//! One event resolves to its catalog rule; a batch resolves to the union of
//! every rule it triggers, deduplicated by region, so simultaneous events
//! never invalidate the same region twice.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::{info, instrument, warn};

use crate::catalog;
use crate::events::{DomainEvent, EventBus, Subscription};
use crate::keys::CacheRegion;
use crate::store::CacheStore;

const METRIC_INVALIDATE_MS: &str = "freshet_invalidate_ms";
const METRIC_REGIONS_INVALIDATED: &str = "freshet_regions_invalidated_total";
const METRIC_REGION_FAILURES: &str = "freshet_region_failures_total";

/// Deduplicated set of regions to invalidate for one or more events.
///
/// Merging happens by value: the same region named by several events (or by
/// both the `primary` and `dependent` role of one rule) appears once. The
/// same base key under two different scopes stays as two pairs.
#[derive(Debug, Default)]
pub struct InvalidationPlan {
    regions: HashSet<CacheRegion>,
}

impl InvalidationPlan {
    /// Plan for a single event.
    pub fn from_event(event: &DomainEvent) -> Self {
        Self::from_events([event])
    }

    /// Merged plan for a batch of events.
    ///
    /// Events are deduplicated by id first. An event type without a catalog
    /// rule is logged and skipped; an event whose payload carries no entity
    /// identifier skips its scoped role entirely (never widened to an
    /// unscoped sweep).
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a DomainEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events {
            if !seen_ids.insert(event.id) {
                continue;
            }

            let Some(rule) = catalog::rule_for(event.event_type()) else {
                warn!(
                    event_type = %event.event_type(),
                    "no invalidation rule for event type; skipping"
                );
                continue;
            };

            for base in rule.primary {
                plan.regions.insert(CacheRegion::unscoped(*base));
            }
            if let Some(scope) = event.kind.scope_id() {
                for base in rule.scoped {
                    plan.regions.insert(CacheRegion::scoped(*base, scope));
                }
            }
            for base in rule.dependent {
                plan.regions.insert(CacheRegion::unscoped(*base));
            }
        }

        plan
    }

    pub fn regions(&self) -> impl Iterator<Item = &CacheRegion> {
        self.regions.iter()
    }

    pub fn contains(&self, region: &CacheRegion) -> bool {
        self.regions.contains(region)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvalidationPlan {{ regions: {} }}", self.regions.len())
    }
}

/// Drives the cache store from domain events.
///
/// All region invalidations of one pass are issued concurrently and awaited
/// as a group; a failing region is logged and counted but never cancels its
/// siblings or the pass.
pub struct CoherenceEngine {
    store: Arc<dyn CacheStore>,
}

impl CoherenceEngine {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Invalidate every region the event's catalog rule names. A catalog
    /// miss is a logged no-op.
    #[instrument(skip_all, fields(event_type = %event.event_type()))]
    pub async fn invalidate_for_event(&self, event: &DomainEvent) {
        self.execute(InvalidationPlan::from_event(event), 1).await;
    }

    /// Invalidate the merged region set of a batch, once per region.
    #[instrument(skip_all, fields(event_count = events.len()))]
    pub async fn invalidate_for_batch(&self, events: &[DomainEvent]) {
        self.execute(InvalidationPlan::from_events(events), events.len())
            .await;
    }

    /// Execute a prepared plan. The pass resolves once every region attempt
    /// has settled, successful or not.
    pub async fn execute(&self, plan: InvalidationPlan, event_count: usize) {
        if plan.is_empty() {
            return;
        }
        let started = Instant::now();

        let results = join_all(plan.regions().map(|region| async move {
            let result = self.store.invalidate(region, true).await;
            (region, result)
        }))
        .await;

        let mut failures: u64 = 0;
        for (region, result) in results {
            if let Err(error) = result {
                failures += 1;
                warn!(region = %region, error = %error, "region invalidation failed");
            }
        }

        info!(
            event_count,
            regions = plan.len(),
            failures,
            "invalidation pass complete"
        );
        counter!(METRIC_REGIONS_INVALIDATED).increment(plan.len() as u64);
        if failures > 0 {
            counter!(METRIC_REGION_FAILURES).increment(failures);
        }
        histogram!(METRIC_INVALIDATE_MS).record(started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Subscribe the engine to every event on the bus.
    ///
    /// Dispatch stays synchronous on the publisher; each event spawns a
    /// fire-and-forget invalidation task, so no ordering is guaranteed
    /// between the invalidations of two sequential publishes. Requires a
    /// running Tokio runtime at publish time.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Subscription {
        let engine = Arc::clone(self);
        bus.subscribe_all(move |event| {
            let engine = Arc::clone(&engine);
            let event = event.clone();
            tokio::spawn(async move {
                engine.invalidate_for_event(&event).await;
            });
        })
    }
}
