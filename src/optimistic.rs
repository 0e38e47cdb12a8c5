//! Optimistic cache updates with rollback.
//!
//! A write operation that wants instant feedback applies a speculative value
//! to a region before its mutation settles. The returned handle restores the
//! pre-update value if the mutation fails; on success the handle is simply
//! dropped and the subsequent event-driven invalidation supersedes the
//! speculative value with server truth.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::keys::CacheRegion;
use crate::store::{CacheStore, WriteSeq};

/// Outcome of a rollback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The pre-update value was restored verbatim.
    Restored,
    /// A newer write landed after the optimistic one; nothing was changed.
    Superseded,
}

/// Applies speculative mutations to cache regions.
pub struct OptimisticUpdateManager {
    store: Arc<dyn CacheStore>,
}

impl OptimisticUpdateManager {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Apply a speculative value computed from the current one.
    ///
    /// The previous value and the write sequence of the speculative write are
    /// captured in the returned handle. Callers must invoke
    /// [`OptimisticUpdate::rollback`] iff the underlying mutation fails.
    pub fn apply<F>(&self, region: &CacheRegion, updater: F) -> OptimisticUpdate
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let previous = self.store.get(region);
        let next = updater(previous.as_ref());
        let applied_seq = self.store.set(region, next);

        debug!(region = %region, applied_seq, "optimistic update applied");

        OptimisticUpdate {
            store: Arc::clone(&self.store),
            region: region.clone(),
            previous,
            applied_seq,
        }
    }
}

/// Pairs an optimistic write with its rollback path.
pub struct OptimisticUpdate {
    store: Arc<dyn CacheStore>,
    region: CacheRegion,
    previous: Option<Value>,
    applied_seq: WriteSeq,
}

impl OptimisticUpdate {
    pub fn region(&self) -> &CacheRegion {
        &self.region
    }

    /// Value present immediately before the optimistic write, if any.
    pub fn previous_value(&self) -> Option<&Value> {
        self.previous.as_ref()
    }

    /// Restore the pre-update value.
    ///
    /// A no-op when the region's current write sequence is newer than the
    /// optimistic write's: a refetch or a later update already replaced the
    /// speculative value, and restoring would clobber fresher data. Safe to
    /// call more than once.
    pub fn rollback(&self) -> RollbackOutcome {
        let superseded = self
            .store
            .last_write_seq(&self.region)
            .is_some_and(|seq| seq > self.applied_seq);
        if superseded {
            debug!(
                region = %self.region,
                applied_seq = self.applied_seq,
                "rollback skipped: newer write present"
            );
            return RollbackOutcome::Superseded;
        }

        match &self.previous {
            Some(value) => {
                self.store.set(&self.region, value.clone());
            }
            None => self.store.remove(&self.region),
        }
        debug!(region = %self.region, "optimistic update rolled back");
        RollbackOutcome::Restored
    }
}
