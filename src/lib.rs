//! Freshet Cache Coherence Engine
//!
//! Keeps a client-side read model (a key-addressed cache of server-derived
//! entities) consistent after writes, without each write site having to
//! hand-enumerate the cache regions it affects:
//!
//! - **EventBus**: typed publish/subscribe channel for business-level events
//! - **Catalog**: declarative mapping from event types to cache regions
//! - **CoherenceEngine**: batched, deduplicated cascade invalidation
//! - **OptimisticUpdateManager**: speculative writes with guarded rollback
//! - **BackgroundRefresher**: tiered re-validation on a timer
//!
//! ## Usage
//!
//! ```ignore
//! let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
//! let runtime = CoherenceRuntime::init(CoherenceConfig::default(), store);
//!
//! // After a successful client creation:
//! runtime.client_created(&client.id);
//!
//! // At teardown of the owning scope:
//! runtime.dispose();
//! ```

pub mod catalog;
mod config;
mod engine;
mod events;
mod keys;
mod lock;
mod optimistic;
mod refresh;
mod runtime;
mod store;

pub use catalog::{InvalidationRule, rule_for};
pub use config::CoherenceConfig;
pub use engine::{CoherenceEngine, InvalidationPlan};
pub use events::{
    DEFAULT_HISTORY_CAPACITY, DomainEvent, Epoch, EventBus, EventKind, EventType, Subscription,
};
pub use keys::{BaseKey, CacheRegion};
pub use optimistic::{OptimisticUpdate, OptimisticUpdateManager, RollbackOutcome};
pub use refresh::{BackgroundRefresher, Priority, RefreshTask, RefreshTiers};
pub use runtime::CoherenceRuntime;
pub use store::{CacheStore, MemoryStore, RegionStatus, StoreError, WriteSeq};
