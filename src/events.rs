//! Domain event bus.
//!
//! Typed publish/subscribe channel for business-level events, independent of
//! cache keys. Dispatch is synchronous and runs against a snapshot of the
//! registrations taken at publish time; a bounded history buffer keeps the
//! most recent events for inspection.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::lock::mutex_guard;

/// Default number of events retained in the history buffer.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Monotonic epoch for ordering events within one bus.
pub type Epoch = u64;

/// Payload-free event discriminant, used for subscription routing and
/// catalog lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PortfolioUpdated,
    HoldingAdded,
    ClientCreated,
    ClientUpdated,
    ScenarioCalculated,
    TaskCompleted,
    TaskCreated,
    PipelineMoved,
    KpiUpdated,
    NotificationTriggered,
}

impl EventType {
    /// Every declared event type, for exhaustive catalog checks.
    pub const ALL: [EventType; 10] = [
        EventType::PortfolioUpdated,
        EventType::HoldingAdded,
        EventType::ClientCreated,
        EventType::ClientUpdated,
        EventType::ScenarioCalculated,
        EventType::TaskCompleted,
        EventType::TaskCreated,
        EventType::PipelineMoved,
        EventType::KpiUpdated,
        EventType::NotificationTriggered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PortfolioUpdated => "portfolio_updated",
            EventType::HoldingAdded => "holding_added",
            EventType::ClientCreated => "client_created",
            EventType::ClientUpdated => "client_updated",
            EventType::ScenarioCalculated => "scenario_calculated",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskCreated => "task_created",
            EventType::PipelineMoved => "pipeline_moved",
            EventType::KpiUpdated => "kpi_updated",
            EventType::NotificationTriggered => "notification_triggered",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A business-level change notification with its typed payload.
///
/// Each variant carries exactly the entity identifiers the producing write
/// operation knows about; scope derivation never inspects untyped maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A portfolio's composition or valuation changed.
    PortfolioUpdated {
        portfolio_id: String,
        client_id: String,
    },
    /// A holding was added to a portfolio.
    HoldingAdded {
        portfolio_id: String,
        client_id: String,
    },
    /// A client record was created.
    ClientCreated { client_id: String },
    /// A client record was updated.
    ClientUpdated { client_id: String },
    /// A planning scenario finished calculating. Both identifiers are
    /// optional: ad-hoc scenarios are neither persisted nor client-bound.
    ScenarioCalculated {
        scenario_id: Option<String>,
        client_id: Option<String>,
    },
    /// A compliance task was completed.
    TaskCompleted { task_id: String, client_id: String },
    /// A compliance task was created.
    TaskCreated { task_id: String, client_id: String },
    /// A client moved between pipeline stages.
    PipelineMoved {
        client_id: String,
        from_stage: String,
        to_stage: String,
    },
    /// KPI metrics were recomputed.
    KpiUpdated { metrics: Vec<String> },
    /// Informational notification; no cache impact.
    NotificationTriggered { message: String },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::PortfolioUpdated { .. } => EventType::PortfolioUpdated,
            EventKind::HoldingAdded { .. } => EventType::HoldingAdded,
            EventKind::ClientCreated { .. } => EventType::ClientCreated,
            EventKind::ClientUpdated { .. } => EventType::ClientUpdated,
            EventKind::ScenarioCalculated { .. } => EventType::ScenarioCalculated,
            EventKind::TaskCompleted { .. } => EventType::TaskCompleted,
            EventKind::TaskCreated { .. } => EventType::TaskCreated,
            EventKind::PipelineMoved { .. } => EventType::PipelineMoved,
            EventKind::KpiUpdated { .. } => EventType::KpiUpdated,
            EventKind::NotificationTriggered { .. } => EventType::NotificationTriggered,
        }
    }

    /// Client identifier carried by the event, if any.
    pub fn client_id(&self) -> Option<&str> {
        match self {
            EventKind::PortfolioUpdated { client_id, .. }
            | EventKind::HoldingAdded { client_id, .. }
            | EventKind::ClientCreated { client_id }
            | EventKind::ClientUpdated { client_id }
            | EventKind::TaskCompleted { client_id, .. }
            | EventKind::TaskCreated { client_id, .. }
            | EventKind::PipelineMoved { client_id, .. } => Some(client_id.as_str()),
            EventKind::ScenarioCalculated { client_id, .. } => client_id.as_deref(),
            EventKind::KpiUpdated { .. } | EventKind::NotificationTriggered { .. } => None,
        }
    }

    /// Portfolio identifier carried by the event, if any.
    pub fn portfolio_id(&self) -> Option<&str> {
        match self {
            EventKind::PortfolioUpdated { portfolio_id, .. }
            | EventKind::HoldingAdded { portfolio_id, .. } => Some(portfolio_id.as_str()),
            _ => None,
        }
    }

    /// Scenario identifier carried by the event, if any.
    pub fn scenario_id(&self) -> Option<&str> {
        match self {
            EventKind::ScenarioCalculated { scenario_id, .. } => scenario_id.as_deref(),
            _ => None,
        }
    }

    /// Identifier used for scoped invalidation.
    ///
    /// Fixed precedence: client, then portfolio, then scenario. The order is
    /// part of the contract and must not change; scoped cache entries are
    /// keyed by whichever identifier this returns.
    pub fn scope_id(&self) -> Option<&str> {
        self.client_id()
            .or_else(|| self.portfolio_id())
            .or_else(|| self.scenario_id())
    }
}

/// A published domain event.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    /// Unique identifier, used for idempotency when batching.
    pub id: Uuid,
    /// Monotonic epoch within the publishing bus.
    pub epoch: Epoch,
    /// The typed event payload.
    pub kind: EventKind,
    /// When the event was published.
    pub timestamp: OffsetDateTime,
}

impl DomainEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }
}

type Listener = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

struct Registration {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct BusState {
    by_type: HashMap<EventType, Vec<Registration>>,
    wildcard: Vec<Registration>,
    history: VecDeque<DomainEvent>,
}

/// Where a subscription was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionTarget {
    Type(EventType),
    All,
}

/// Handle for removing a listener registration.
///
/// `unsubscribe` removes the registration by identity and is idempotent.
/// Dropping the handle does NOT unsubscribe; a registration outlives its
/// handle until the bus is cleared.
pub struct Subscription {
    state: Weak<Mutex<BusState>>,
    target: SubscriptionTarget,
    id: u64,
}

impl Subscription {
    /// Remove the registration. Safe to call more than once; a no-op after
    /// the bus has been dropped or cleared.
    pub fn unsubscribe(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = mutex_guard(&state, "unsubscribe");
        let registrations = match self.target {
            SubscriptionTarget::Type(event_type) => match state.by_type.get_mut(&event_type) {
                Some(registrations) => registrations,
                None => return,
            },
            SubscriptionTarget::All => &mut state.wildcard,
        };
        registrations.retain(|registration| registration.id != self.id);
    }
}

/// Synchronous publish/subscribe bus for domain events.
///
/// Listener dispatch happens inside `publish`, in registration order, type
/// listeners before wildcard listeners. A panicking listener is isolated:
/// it is caught and logged, and the remaining listeners still run.
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
    epoch_counter: AtomicU64,
    registration_counter: AtomicU64,
    history_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// A bus retaining at most `history_capacity` events.
    pub fn with_capacity(history_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            epoch_counter: AtomicU64::new(0),
            registration_counter: AtomicU64::new(0),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Next monotonic epoch. Also used to stamp events constructed for batch
    /// invalidation outside `publish`.
    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a listener for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.registration_counter.fetch_add(1, Ordering::SeqCst);
        let registration = Registration {
            id,
            listener: Arc::new(listener),
        };
        mutex_guard(&self.state, "subscribe")
            .by_type
            .entry(event_type)
            .or_default()
            .push(registration);
        Subscription {
            state: Arc::downgrade(&self.state),
            target: SubscriptionTarget::Type(event_type),
            id,
        }
    }

    /// Register a listener for every event type.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = self.registration_counter.fetch_add(1, Ordering::SeqCst);
        let registration = Registration {
            id,
            listener: Arc::new(listener),
        };
        mutex_guard(&self.state, "subscribe_all")
            .wildcard
            .push(registration);
        Subscription {
            state: Arc::downgrade(&self.state),
            target: SubscriptionTarget::All,
            id,
        }
    }

    /// Publish an event: record it in the history buffer, then synchronously
    /// invoke the type listeners followed by the wildcard listeners, in
    /// registration order. Never panics; delivery is best-effort,
    /// at-most-once per registered listener per call.
    pub fn publish(&self, kind: EventKind) -> DomainEvent {
        let event = DomainEvent::new(kind, self.next_epoch());

        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_type = %event.event_type(),
            "domain event published"
        );

        // Snapshot registrations under the lock, dispatch outside it, so a
        // listener may subscribe or publish without deadlocking and without
        // affecting the current pass.
        let snapshot: Vec<Listener> = {
            let mut state = mutex_guard(&self.state, "publish");
            state.history.push_back(event.clone());
            while state.history.len() > self.history_capacity {
                state.history.pop_front();
            }

            let type_listeners = state
                .by_type
                .get(&event.event_type())
                .map(|registrations| registrations.iter().map(|r| Arc::clone(&r.listener)))
                .into_iter()
                .flatten();
            let wildcard_listeners = state.wildcard.iter().map(|r| Arc::clone(&r.listener));
            type_listeners.chain(wildcard_listeners).collect()
        };

        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(&event)));
            if outcome.is_err() {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type(),
                    "event listener panicked; remaining listeners still run"
                );
            }
        }

        event
    }

    /// Copy of the history buffer, newest-last.
    pub fn history(&self) -> Vec<DomainEvent> {
        mutex_guard(&self.state, "history")
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Number of registered listeners for one event type (wildcards not
    /// included).
    pub fn listener_count(&self, event_type: EventType) -> usize {
        mutex_guard(&self.state, "listener_count")
            .by_type
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Drop all subscriptions and history. Teardown only.
    pub fn clear(&self) {
        let mut state = mutex_guard(&self.state, "clear");
        state.by_type.clear();
        state.wildcard.clear();
        state.history.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
