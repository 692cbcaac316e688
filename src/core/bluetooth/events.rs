//! Event hub for bus signals and timers.
//!
//! Transports push every raw [`BusEvent`] into the hub. The hub forwards an
//! event onto the single dispatcher queue only while some live
//! [`Subscription`] matches it. Releasing a subscription affects later
//! emissions only: anything already queued is still delivered, so handlers
//! must check their own state before acting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::types::{BusEvent, EntityKind, LoopEvent, ObjectPath, TimerId, TimerKind};

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    EntityAdded,
    EntityRemoved,
    PropertiesChanged,
}

impl EventKind {
    pub fn of(event: &BusEvent) -> Self {
        match event {
            BusEvent::EntityAdded { .. } => Self::EntityAdded,
            BusEvent::EntityRemoved { .. } => Self::EntityRemoved,
            BusEvent::PropertiesChanged { .. } => Self::PropertiesChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathScope {
    /// Only the object at this path.
    Exact(ObjectPath),
    /// Only objects strictly below this path.
    Subtree(ObjectPath),
}

impl PathScope {
    fn contains(&self, path: &ObjectPath) -> bool {
        match self {
            Self::Exact(p) => p == path,
            Self::Subtree(root) => path.is_descendant_of(root),
        }
    }
}

/// Which events a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub scope: Option<PathScope>,
    /// Restricts added/removed events to one entity kind.
    pub entity: Option<EntityKind>,
}

impl EventFilter {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            scope: None,
            entity: None,
        }
    }

    pub fn scoped(mut self, scope: PathScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn entity(mut self, entity: EntityKind) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn matches(&self, event: &BusEvent) -> bool {
        if EventKind::of(event) != self.kind {
            return false;
        }
        if let Some(scope) = &self.scope {
            if !scope.contains(event.path()) {
                return false;
            }
        }
        match (self.entity, event) {
            (None, _) => true,
            (Some(kind), BusEvent::EntityAdded { entity, .. }) => entity.kind() == kind,
            (Some(kind), BusEvent::EntityRemoved { kinds, .. }) => kinds.contains(&kind),
            (Some(_), BusEvent::PropertiesChanged { .. }) => true,
        }
    }
}

struct HubInner {
    filters: Mutex<HashMap<SubscriptionId, EventFilter>>,
    next_id: AtomicU64,
    next_timer: AtomicU64,
    queue: mpsc::UnboundedSender<LoopEvent>,
}

impl HubInner {
    fn filters(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, EventFilter>> {
        self.filters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle to the dispatcher queue.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    /// Creates a hub and the receiving end the dispatcher loop reads from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (queue, events) = mpsc::unbounded_channel();
        let hub = Self {
            inner: Arc::new(HubInner {
                filters: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                next_timer: AtomicU64::new(1),
                queue,
            }),
        };
        (hub, events)
    }

    /// Registers `filter`; events matching it are queued until the
    /// returned handle is released or dropped.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Subscription {} registered for {:?}", id, filter.kind);
        self.inner.filters().insert(id, filter);
        Subscription {
            id,
            hub: self.inner.clone(),
            active: true,
        }
    }

    /// Called by transports for every raw bus event.
    pub fn emit(&self, event: BusEvent) {
        let wanted = self.inner.filters().values().any(|f| f.matches(&event));
        if !wanted {
            trace!("Dropping unsubscribed event on {}", event.path());
            return;
        }
        if self.inner.queue.send(LoopEvent::Bus(event)).is_err() {
            debug!("Dispatcher queue closed, event discarded");
        }
    }

    /// Arms a one-shot timer that posts `LoopEvent::Timer(kind, id)` after
    /// `after`, unless the returned guard is cancelled or dropped first.
    /// A timer that already fired stays queued; compare it with
    /// [`Timer::fired`] before acting on it.
    pub fn schedule(&self, kind: TimerKind, after: Duration) -> Timer {
        let id = self.inner.next_timer.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let queue = self.inner.queue.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    debug!("{:?} timer {} fired", kind, id);
                    let _ = queue.send(LoopEvent::Timer(kind, id));
                }
                _ = cancelled.cancelled() => {
                    debug!("{:?} timer {} cancelled", kind, id);
                }
            }
        });
        Timer { kind, id, token }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.filters().len()
    }
}

/// Scoped registration with the hub. Released at most once; release is a
/// no-op when already released, and happens automatically on drop.
pub struct Subscription {
    id: SubscriptionId,
    hub: Arc<HubInner>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true only for the call that actually released it.
    pub fn release(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.hub.filters().remove(&self.id);
        debug!("Subscription {} released", self.id);
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

/// Guard for a scheduled timer. Cancels on drop.
#[derive(Debug)]
pub struct Timer {
    kind: TimerKind,
    id: TimerId,
    token: CancellationToken,
}

impl Timer {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Whether `event` is this timer firing.
    pub fn fired(&self, event: &LoopEvent) -> bool {
        matches!(event, LoopEvent::Timer(kind, id) if *kind == self.kind && *id == self.id)
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::types::{DeviceAttributes, Entity, PropertyChanges};

    fn device_added(path: &str) -> BusEvent {
        BusEvent::EntityAdded {
            path: ObjectPath::new(path),
            entity: Entity::Device(DeviceAttributes::default()),
        }
    }

    #[test]
    fn unsubscribed_events_are_not_queued() {
        let (hub, mut events) = EventHub::new();
        hub.emit(device_added("/org/bluez/hci0/dev_A"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn release_is_idempotent_and_stops_later_deliveries() {
        let (hub, mut events) = EventHub::new();
        let mut sub = hub.subscribe(EventFilter::new(EventKind::EntityAdded).entity(EntityKind::Device));
        hub.emit(device_added("/org/bluez/hci0/dev_A"));

        assert!(sub.release());
        assert!(!sub.release());
        assert!(!sub.is_active());
        assert_eq!(hub.active_subscriptions(), 0);

        hub.emit(device_added("/org/bluez/hci0/dev_B"));
        // Queued before the release, so still delivered.
        assert!(matches!(events.try_recv(), Ok(LoopEvent::Bus(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn drop_releases() {
        let (hub, _events) = EventHub::new();
        {
            let _sub = hub.subscribe(EventFilter::new(EventKind::PropertiesChanged));
            assert_eq!(hub.active_subscriptions(), 1);
        }
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[test]
    fn filters_respect_scope_and_entity_kind() {
        let device = ObjectPath::new("/org/bluez/hci0/dev_A");
        let subtree = EventFilter::new(EventKind::EntityAdded).scoped(PathScope::Subtree(device.clone()));
        let service = BusEvent::EntityAdded {
            path: device.child("service000c"),
            entity: Entity::Service {
                uuid: crate::core::bluetooth::matcher::CapabilityId::from_short(0x180f),
            },
        };
        assert!(subtree.matches(&service));
        assert!(!subtree.matches(&device_added("/org/bluez/hci0/dev_B/service000c")));

        let devices_only = EventFilter::new(EventKind::EntityAdded).entity(EntityKind::Device);
        assert!(!devices_only.matches(&service));

        let removed = BusEvent::EntityRemoved {
            path: device.clone(),
            kinds: vec![EntityKind::Device],
        };
        assert!(EventFilter::new(EventKind::EntityRemoved).entity(EntityKind::Device).matches(&removed));
        assert!(!devices_only.matches(&removed));

        let exact = EventFilter::new(EventKind::PropertiesChanged).scoped(PathScope::Exact(device.clone()));
        let changed = BusEvent::PropertiesChanged {
            path: device,
            changes: PropertyChanges::services_resolved(true),
        };
        assert!(exact.matches(&changed));
    }

    #[tokio::test]
    async fn timer_posts_onto_queue() {
        let (hub, mut events) = EventHub::new();
        let timer = hub.schedule(TimerKind::ScanWindow, Duration::from_millis(5));
        let event = events.recv().await.unwrap();
        assert_eq!(event, LoopEvent::Timer(TimerKind::ScanWindow, timer.id()));
        assert!(timer.fired(&event));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (hub, mut events) = EventHub::new();
        let cancelled = hub.schedule(TimerKind::Enumeration, Duration::from_millis(20));
        cancelled.cancel();
        let live = hub.schedule(TimerKind::ScanWindow, Duration::from_millis(40));

        let event = events.recv().await.unwrap();
        assert!(live.fired(&event));
        assert!(!cancelled.fired(&event));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn timers_of_the_same_kind_are_told_apart() {
        let (hub, _events) = EventHub::new();
        let first = hub.schedule(TimerKind::Enumeration, Duration::from_secs(60));
        let second = hub.schedule(TimerKind::Enumeration, Duration::from_secs(60));

        assert_ne!(first.id(), second.id());
        let from_first = LoopEvent::Timer(TimerKind::Enumeration, first.id());
        assert!(first.fired(&from_first));
        assert!(!second.fired(&from_first));
        assert!(!first.fired(&LoopEvent::Timer(TimerKind::ScanWindow, first.id())));
    }
}
