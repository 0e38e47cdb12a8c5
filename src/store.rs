//! Cache store contract and in-memory reference implementation.
//!
//! The engine only addresses regions; the store owns the values. `get`/`set`
//! are non-blocking; `invalidate` and `prefetch` suspend because the fetch
//! layer underneath them may go to the network.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::keys::CacheRegion;
use crate::lock::{read_lock, write_lock};

/// Monotonic sequence number assigned to every cache write.
///
/// Rollback of an optimistic update compares sequence numbers to avoid
/// clobbering a write that landed after the speculative one.
pub type WriteSeq = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The refresh backing an invalidation or prefetch failed. The region
    /// stays stale and is retried on its next read.
    #[error("refresh failed for region `{region}`: {reason}")]
    RefreshFailed { region: String, reason: String },
}

/// Freshness of a cached region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStatus {
    /// The last fetch or write has not been invalidated.
    Fresh,
    /// Invalidated; the next read triggers a refetch.
    Stale,
}

/// Contract the coherence engine consumes.
///
/// Invalidation is idempotent at region granularity: marking a region stale
/// twice has the same effect as once, and only the fresh-to-stale transition
/// may schedule a refetch.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read the cached value for a region. Reading marks the region observed
    /// (active); reading a stale region requests a refetch.
    fn get(&self, region: &CacheRegion) -> Option<Value>;

    /// Write a value, marking the region fresh. Returns the write sequence.
    fn set(&self, region: &CacheRegion, value: Value) -> WriteSeq;

    /// Evict the region outright. Distinct from invalidation: the value is
    /// gone, not stale.
    fn remove(&self, region: &CacheRegion);

    /// Mark every entry the region covers as stale. With `active_only`, a
    /// refetch is requested only for observed entries; unobserved entries
    /// stay stale until their next read.
    async fn invalidate(&self, region: &CacheRegion, active_only: bool) -> Result<(), StoreError>;

    /// Request a load for a missing or stale region ahead of need.
    async fn prefetch(&self, region: &CacheRegion) -> Result<(), StoreError>;

    /// Freshness of the region, if present.
    fn status(&self, region: &CacheRegion) -> Option<RegionStatus>;

    /// Sequence number of the region's last write, if any.
    fn last_write_seq(&self, region: &CacheRegion) -> Option<WriteSeq>;
}

struct Entry {
    value: Value,
    status: RegionStatus,
    observed: bool,
    write_seq: WriteSeq,
}

/// In-memory store for the read model.
///
/// The fetch layer is external: this store records refetch requests instead
/// of performing them, and exposes the counts so hosts and tests can observe
/// fetch side effects per region.
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheRegion, Entry>>,
    refetch_requests: RwLock<HashMap<CacheRegion, u64>>,
    write_counter: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            refetch_requests: RwLock::new(HashMap::new()),
            write_counter: AtomicU64::new(0),
        }
    }

    /// Number of refetch requests recorded for a region.
    pub fn refetch_count(&self, region: &CacheRegion) -> u64 {
        read_lock(&self.refetch_requests, "refetch_count")
            .get(region)
            .copied()
            .unwrap_or(0)
    }

    /// Number of cached regions.
    pub fn len(&self) -> usize {
        read_lock(&self.entries, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn request_refetch(&self, region: &CacheRegion) {
        let mut requests = write_lock(&self.refetch_requests, "request_refetch");
        *requests.entry(region.clone()).or_insert(0) += 1;
        debug!(region = %region, "refetch requested");
    }

    fn next_write_seq(&self) -> WriteSeq {
        self.write_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn get(&self, region: &CacheRegion) -> Option<Value> {
        let (value, status) = {
            let mut entries = write_lock(&self.entries, "get");
            let entry = entries.get_mut(region)?;
            entry.observed = true;
            (entry.value.clone(), entry.status)
        };
        if status == RegionStatus::Stale {
            self.request_refetch(region);
        }
        Some(value)
    }

    fn set(&self, region: &CacheRegion, value: Value) -> WriteSeq {
        let write_seq = self.next_write_seq();
        let mut entries = write_lock(&self.entries, "set");
        let observed = entries.get(region).is_some_and(|entry| entry.observed);
        entries.insert(
            region.clone(),
            Entry {
                value,
                status: RegionStatus::Fresh,
                observed,
                write_seq,
            },
        );
        write_seq
    }

    fn remove(&self, region: &CacheRegion) {
        write_lock(&self.entries, "remove").remove(region);
    }

    async fn invalidate(&self, region: &CacheRegion, active_only: bool) -> Result<(), StoreError> {
        let refetch: Vec<CacheRegion> = {
            let mut entries = write_lock(&self.entries, "invalidate");
            entries
                .iter_mut()
                .filter(|(key, _)| region.covers(key))
                .filter_map(|(key, entry)| {
                    let was_fresh = entry.status == RegionStatus::Fresh;
                    entry.status = RegionStatus::Stale;
                    // Only the fresh-to-stale transition schedules a refetch;
                    // repeated invalidation is a no-op.
                    let wants_refetch = was_fresh && (!active_only || entry.observed);
                    wants_refetch.then(|| key.clone())
                })
                .collect()
        };
        for key in refetch {
            self.request_refetch(&key);
        }
        Ok(())
    }

    async fn prefetch(&self, region: &CacheRegion) -> Result<(), StoreError> {
        let needs_load = {
            let entries = read_lock(&self.entries, "prefetch");
            entries
                .get(region)
                .is_none_or(|entry| entry.status == RegionStatus::Stale)
        };
        if needs_load {
            self.request_refetch(region);
        }
        Ok(())
    }

    fn status(&self, region: &CacheRegion) -> Option<RegionStatus> {
        read_lock(&self.entries, "status")
            .get(region)
            .map(|entry| entry.status)
    }

    fn last_write_seq(&self, region: &CacheRegion) -> Option<WriteSeq> {
        read_lock(&self.entries, "last_write_seq")
            .get(region)
            .map(|entry| entry.write_seq)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;
    use crate::keys::BaseKey;

    fn holdings(scope: &str) -> CacheRegion {
        CacheRegion::scoped(BaseKey::PortfolioHoldings, scope)
    }

    #[test]
    fn set_then_get_roundtrip() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::KpiSummary);

        assert!(store.get(&region).is_none());

        store.set(&region, json!({"aum": 125_000}));

        assert_eq!(store.get(&region), Some(json!({"aum": 125_000})));
        assert_eq!(store.status(&region), Some(RegionStatus::Fresh));
    }

    #[test]
    fn write_seq_is_monotonic_per_store() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::KpiSummary);

        let s1 = store.set(&region, json!(1));
        let s2 = store.set(&region, json!(2));
        let s3 = store.set(&holdings("p1"), json!(3));

        assert!(s1 < s2);
        assert!(s2 < s3);
        assert_eq!(store.last_write_seq(&region), Some(s2));
    }

    #[tokio::test]
    async fn invalidate_marks_stale_but_keeps_value_readable() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::FinancialClients);
        store.set(&region, json!(["c1"]));

        store.invalidate(&region, true).await.expect("invalidate");

        assert_eq!(store.status(&region), Some(RegionStatus::Stale));
        // Stale data is still served; the read requests a refetch.
        assert_eq!(store.get(&region), Some(json!(["c1"])));
    }

    #[tokio::test]
    async fn remove_evicts_outright() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::FinancialClients);
        store.set(&region, json!(["c1"]));

        store.remove(&region);

        assert!(store.get(&region).is_none());
        assert!(store.status(&region).is_none());
    }

    #[tokio::test]
    async fn repeated_invalidation_requests_one_refetch() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::KpiSummary);
        store.set(&region, json!(1));
        store.get(&region); // observe

        store.invalidate(&region, true).await.expect("first");
        store.invalidate(&region, true).await.expect("second");

        assert_eq!(store.refetch_count(&region), 1);
        assert_eq!(store.status(&region), Some(RegionStatus::Stale));
    }

    #[tokio::test]
    async fn unscoped_invalidation_sweeps_scoped_entries() {
        let store = MemoryStore::new();
        store.set(&holdings("p1"), json!(1));
        store.set(&holdings("p2"), json!(2));
        store.set(&CacheRegion::unscoped(BaseKey::KpiSummary), json!(3));

        store
            .invalidate(&CacheRegion::unscoped(BaseKey::PortfolioHoldings), true)
            .await
            .expect("invalidate");

        assert_eq!(store.status(&holdings("p1")), Some(RegionStatus::Stale));
        assert_eq!(store.status(&holdings("p2")), Some(RegionStatus::Stale));
        assert_eq!(
            store.status(&CacheRegion::unscoped(BaseKey::KpiSummary)),
            Some(RegionStatus::Fresh)
        );
    }

    #[tokio::test]
    async fn scoped_invalidation_leaves_sibling_scopes_fresh() {
        let store = MemoryStore::new();
        store.set(&holdings("p1"), json!(1));
        store.set(&holdings("p2"), json!(2));

        store.invalidate(&holdings("p1"), true).await.expect("invalidate");

        assert_eq!(store.status(&holdings("p1")), Some(RegionStatus::Stale));
        assert_eq!(store.status(&holdings("p2")), Some(RegionStatus::Fresh));
    }

    #[tokio::test]
    async fn active_only_skips_refetch_for_unobserved_entries() {
        let store = MemoryStore::new();
        let observed = CacheRegion::unscoped(BaseKey::FinancialDashboard);
        let unobserved = CacheRegion::unscoped(BaseKey::KpiHistorical);
        store.set(&observed, json!(1));
        store.set(&unobserved, json!(2));
        store.get(&observed);

        store.invalidate(&observed, true).await.expect("observed");
        store.invalidate(&unobserved, true).await.expect("unobserved");

        assert_eq!(store.refetch_count(&observed), 1);
        assert_eq!(store.refetch_count(&unobserved), 0);
        // Both are stale either way; the unobserved one refetches lazily.
        assert_eq!(store.status(&unobserved), Some(RegionStatus::Stale));
    }

    #[tokio::test]
    async fn eager_invalidation_refetches_regardless_of_observation() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::KpiHistorical);
        store.set(&region, json!(1));

        store.invalidate(&region, false).await.expect("invalidate");

        assert_eq!(store.refetch_count(&region), 1);
    }

    #[tokio::test]
    async fn stale_read_requests_refetch() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::FinancialClients);
        store.set(&region, json!(["c1"]));

        store.invalidate(&region, true).await.expect("invalidate");
        assert_eq!(store.refetch_count(&region), 0); // never observed

        store.get(&region);
        assert_eq!(store.refetch_count(&region), 1);
    }

    #[tokio::test]
    async fn prefetch_requests_load_for_missing_or_stale_regions() {
        let store = MemoryStore::new();
        let missing = CacheRegion::unscoped(BaseKey::TaskTemplates);
        let fresh = CacheRegion::unscoped(BaseKey::KpiSummary);
        store.set(&fresh, json!(1));

        store.prefetch(&missing).await.expect("missing");
        store.prefetch(&fresh).await.expect("fresh");

        assert_eq!(store.refetch_count(&missing), 1);
        assert_eq!(store.refetch_count(&fresh), 0);
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = MemoryStore::new();
        let region = CacheRegion::unscoped(BaseKey::KpiSummary);

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock");
            panic!("poison entries lock");
        }));

        store.set(&region, json!(1));
        assert!(store.get(&region).is_some());
    }
}
