//! Service resolution for a connected device.
//!
//! Walks the service/characteristic/descriptor objects announced for the
//! device and decides, once the device reports its service tree as
//! resolved, whether it exposes the required service and characteristic.

use std::time::Duration;

use log::{debug, info, warn};

use crate::core::bluetooth::events::{EventFilter, EventHub, EventKind, PathScope, Subscription, Timer};
use crate::core::bluetooth::matcher::{matches, name_for_uuid, render_flags, CapabilityId};
use crate::core::bluetooth::types::{BusEvent, Entity, LoopEvent, ObjectPath, TimerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPhase {
    AwaitingConnection,
    Enumerating,
    Resolved,
    Rejected,
    TimedOut,
}

impl ResolutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected | Self::TimedOut)
    }
}

/// What has been found so far for one connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionState {
    pub service: Option<ObjectPath>,
    pub characteristic: Option<ObjectPath>,
    /// Flags of the matched characteristic, for display.
    pub characteristic_flags: Vec<String>,
    pub services_resolved: bool,
}

impl ResolutionState {
    pub fn service_found(&self) -> bool {
        self.service.is_some()
    }

    pub fn characteristic_found(&self) -> bool {
        self.characteristic.is_some()
    }
}

/// Outcome of feeding one event to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    Resolved {
        service: ObjectPath,
        characteristic: ObjectPath,
    },
    Rejected {
        service_found: bool,
        characteristic_found: bool,
    },
    TimedOut,
}

pub struct Resolver {
    hub: EventHub,
    device: ObjectPath,
    service_uuid: CapabilityId,
    characteristic_uuid: CapabilityId,
    phase: ResolutionPhase,
    state: ResolutionState,
    added: Subscription,
    changed: Subscription,
    deadline: Option<Timer>,
}

impl Resolver {
    /// Registers for the device's object and property events. Create the
    /// resolver before asking the transport to connect so that nothing
    /// announced during connection is missed.
    pub fn new(
        hub: &EventHub,
        device: ObjectPath,
        service_uuid: CapabilityId,
        characteristic_uuid: CapabilityId,
    ) -> Self {
        let added = hub.subscribe(
            EventFilter::new(EventKind::EntityAdded).scoped(PathScope::Subtree(device.clone())),
        );
        let changed = hub.subscribe(
            EventFilter::new(EventKind::PropertiesChanged).scoped(PathScope::Exact(device.clone())),
        );
        Self {
            hub: hub.clone(),
            device,
            service_uuid,
            characteristic_uuid,
            phase: ResolutionPhase::AwaitingConnection,
            state: ResolutionState::default(),
            added,
            changed,
            deadline: None,
        }
    }

    pub fn device(&self) -> &ObjectPath {
        &self.device
    }

    pub fn phase(&self) -> ResolutionPhase {
        self.phase
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// The transport connected the device; start classifying objects.
    /// With a `timeout`, a device that never reports a resolved tree is
    /// given up on after that long.
    pub fn connection_established(&mut self, timeout: Option<Duration>) {
        if self.phase != ResolutionPhase::AwaitingConnection {
            return;
        }
        info!("Discovering services....");
        self.phase = ResolutionPhase::Enumerating;
        self.deadline = timeout.map(|after| self.hub.schedule(TimerKind::Enumeration, after));
    }

    /// The transport could not connect; nothing will be enumerated.
    pub fn connection_failed(&mut self) {
        self.phase = ResolutionPhase::Rejected;
        self.release_all();
    }

    pub fn handle(&mut self, event: &LoopEvent) -> Resolution {
        if self.phase != ResolutionPhase::Enumerating {
            debug!("Resolver in {:?}, ignoring {:?}", self.phase, event);
            return Resolution::Pending;
        }
        match event {
            LoopEvent::Bus(BusEvent::EntityAdded { path, entity }) if path.is_descendant_of(&self.device) => {
                self.classify(path, entity);
                Resolution::Pending
            }
            LoopEvent::Bus(BusEvent::PropertiesChanged { path, changes }) if *path == self.device => {
                match changes.services_resolved {
                    Some(true) => {
                        info!("ServicesResolved : true");
                        self.state.services_resolved = true;
                        self.decide()
                    }
                    Some(false) => {
                        debug!("ServicesResolved : false");
                        Resolution::Pending
                    }
                    None => Resolution::Pending,
                }
            }
            LoopEvent::Timer(..) if self.deadline.as_ref().is_some_and(|d| d.fired(event)) => {
                warn!("{} did not report resolved services in time", self.device);
                self.phase = ResolutionPhase::TimedOut;
                self.release_all();
                Resolution::TimedOut
            }
            LoopEvent::Timer(kind, id) => {
                debug!("Ignoring stale {:?} timer {}", kind, id);
                Resolution::Pending
            }
            _ => Resolution::Pending,
        }
    }

    fn classify(&mut self, path: &ObjectPath, entity: &Entity) {
        match entity {
            Entity::Service { uuid } => {
                info!("SVC path   : {}", path);
                info!("SVC UUID   : {}", uuid);
                info!("SVC name   : {}", name_for_uuid(uuid));
                if matches(uuid, &self.service_uuid) {
                    self.state.service = Some(path.clone());
                }
            }
            Entity::Characteristic { uuid, flags } => {
                info!("   CHR path   : {}", path);
                info!("   CHR UUID   : {}", uuid);
                info!("   CHR name   : {}", name_for_uuid(uuid));
                info!("   CHR flags  : {}", render_flags(flags));
                if matches(uuid, &self.characteristic_uuid) {
                    self.state.characteristic = Some(path.clone());
                    self.state.characteristic_flags = flags.clone();
                }
            }
            Entity::Descriptor { uuid } => {
                info!("      DSC path   : {}", path);
                info!("      DSC UUID   : {}", uuid);
                info!("      DSC name   : {}", name_for_uuid(uuid));
            }
            Entity::Device(_) => debug!("Ignoring device object {} under {}", path, self.device),
        }
    }

    fn decide(&mut self) -> Resolution {
        if let Some(deadline) = self.deadline.take() {
            deadline.cancel();
        }
        match (&self.state.service, &self.state.characteristic) {
            (Some(service), Some(characteristic)) => {
                info!("Required service and characteristic found - device is OK");
                info!("Service path: {}", service);
                info!("Characteristic path: {}", characteristic);
                self.phase = ResolutionPhase::Resolved;
                self.added.release();
                Resolution::Resolved {
                    service: service.clone(),
                    characteristic: characteristic.clone(),
                }
            }
            _ => {
                warn!("Required service and characteristic were not found - device is NOK");
                warn!("Service found: {}", self.state.service_found());
                warn!("Characteristic found: {}", self.state.characteristic_found());
                self.phase = ResolutionPhase::Rejected;
                self.release_all();
                Resolution::Rejected {
                    service_found: self.state.service_found(),
                    characteristic_found: self.state.characteristic_found(),
                }
            }
        }
    }

    fn release_all(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.cancel();
        }
        self.added.release();
        self.changed.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_THINGY_TEMPERATURE_CHAR, UUID_THINGY_WEATHER_SERVICE};
    use crate::core::bluetooth::types::PropertyChanges;

    fn device() -> ObjectPath {
        ObjectPath::new("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF")
    }

    fn resolver(hub: &EventHub) -> Resolver {
        Resolver::new(
            hub,
            device(),
            CapabilityId::from(UUID_THINGY_WEATHER_SERVICE),
            CapabilityId::from(UUID_THINGY_TEMPERATURE_CHAR),
        )
    }

    fn added(path: ObjectPath, entity: Entity) -> LoopEvent {
        LoopEvent::Bus(BusEvent::EntityAdded { path, entity })
    }

    fn resolved() -> LoopEvent {
        LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: device(),
            changes: PropertyChanges::services_resolved(true),
        })
    }

    fn weather_service() -> LoopEvent {
        added(
            device().child("service001d"),
            Entity::Service {
                uuid: CapabilityId::from(UUID_THINGY_WEATHER_SERVICE),
            },
        )
    }

    fn temperature_char() -> LoopEvent {
        added(
            device().child("service001d").child("char001e"),
            Entity::Characteristic {
                uuid: CapabilityId::from(UUID_THINGY_TEMPERATURE_CHAR),
                flags: vec!["notify".into()],
            },
        )
    }

    #[test]
    fn resolves_when_both_found_before_signal() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(None);

        assert_eq!(resolver.handle(&weather_service()), Resolution::Pending);
        assert_eq!(resolver.handle(&temperature_char()), Resolution::Pending);
        assert_eq!(
            resolver.handle(&added(
                device().child("service001d").child("char001e").child("desc0020"),
                Entity::Descriptor {
                    uuid: CapabilityId::from_short(0x2902)
                },
            )),
            Resolution::Pending
        );

        assert_eq!(
            resolver.handle(&resolved()),
            Resolution::Resolved {
                service: device().child("service001d"),
                characteristic: device().child("service001d").child("char001e"),
            }
        );
        assert_eq!(resolver.phase(), ResolutionPhase::Resolved);
        assert_eq!(resolver.state().characteristic_flags, vec!["notify".to_string()]);
        // The appeared subscription is gone; the property one lives until drop.
        assert_eq!(hub.active_subscriptions(), 1);
    }

    #[test]
    fn rejects_unrelated_tree() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(None);

        resolver.handle(&added(
            device().child("service000c"),
            Entity::Service {
                uuid: CapabilityId::from_short(0x180f),
            },
        ));
        resolver.handle(&added(
            device().child("service000c").child("char000d"),
            Entity::Characteristic {
                uuid: CapabilityId::from_short(0x2a19),
                flags: vec!["read".into(), "notify".into()],
            },
        ));

        assert_eq!(
            resolver.handle(&resolved()),
            Resolution::Rejected {
                service_found: false,
                characteristic_found: false,
            }
        );
        assert_eq!(resolver.phase(), ResolutionPhase::Rejected);
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[test]
    fn reports_which_requirement_failed() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(None);
        resolver.handle(&weather_service());
        assert_eq!(
            resolver.handle(&resolved()),
            Resolution::Rejected {
                service_found: true,
                characteristic_found: false,
            }
        );
    }

    #[test]
    fn second_signal_after_terminal_is_ignored() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(None);
        resolver.handle(&resolved());
        assert_eq!(resolver.phase(), ResolutionPhase::Rejected);

        // Late entities and a repeated signal change nothing.
        resolver.handle(&weather_service());
        resolver.handle(&temperature_char());
        assert_eq!(resolver.handle(&resolved()), Resolution::Pending);
        assert_eq!(resolver.phase(), ResolutionPhase::Rejected);
        assert!(!resolver.state().service_found());
    }

    #[test]
    fn events_before_connection_are_ignored() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.handle(&weather_service());
        resolver.handle(&temperature_char());
        assert_eq!(resolver.handle(&resolved()), Resolution::Pending);
        assert_eq!(resolver.phase(), ResolutionPhase::AwaitingConnection);
    }

    #[test]
    fn false_signal_and_foreign_paths_do_not_decide() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(None);
        resolver.handle(&weather_service());
        resolver.handle(&temperature_char());

        let not_yet = LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: device(),
            changes: PropertyChanges::services_resolved(false),
        });
        assert_eq!(resolver.handle(&not_yet), Resolution::Pending);

        let other_device = LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: ObjectPath::new("/org/bluez/hci0/dev_11_22_33_44_55_66"),
            changes: PropertyChanges::services_resolved(true),
        });
        assert_eq!(resolver.handle(&other_device), Resolution::Pending);
        assert_eq!(resolver.phase(), ResolutionPhase::Enumerating);
    }

    #[tokio::test]
    async fn enumeration_deadline_times_out() {
        let (hub, mut events) = EventHub::new();
        let mut resolver = resolver(&hub);
        resolver.connection_established(Some(Duration::from_millis(10)));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, LoopEvent::Timer(TimerKind::Enumeration, _)));
        assert_eq!(resolver.handle(&event), Resolution::TimedOut);
        assert_eq!(resolver.phase(), ResolutionPhase::TimedOut);
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn deadline_of_an_earlier_attempt_is_ignored() {
        let (hub, mut events) = EventHub::new();
        let mut first = resolver(&hub);
        first.connection_established(Some(Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The stability signal is handled while the deadline sits queued.
        assert_eq!(
            first.handle(&resolved()),
            Resolution::Rejected {
                service_found: false,
                characteristic_found: false,
            }
        );
        drop(first);

        let mut second = resolver(&hub);
        second.connection_established(None);
        let stale = events.recv().await.unwrap();
        assert!(matches!(stale, LoopEvent::Timer(TimerKind::Enumeration, _)));
        assert_eq!(second.handle(&stale), Resolution::Pending);
        assert_eq!(second.phase(), ResolutionPhase::Enumerating);

        assert_eq!(second.handle(&weather_service()), Resolution::Pending);
        assert_eq!(second.handle(&temperature_char()), Resolution::Pending);
        assert!(matches!(second.handle(&resolved()), Resolution::Resolved { .. }));
    }

    #[tokio::test]
    async fn deadline_from_an_armed_attempt_is_not_confused_with_a_new_one() {
        let (hub, mut events) = EventHub::new();
        let mut first = resolver(&hub);
        first.connection_established(Some(Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.handle(&resolved());
        drop(first);

        let mut second = resolver(&hub);
        second.connection_established(Some(Duration::from_secs(60)));
        let stale = events.recv().await.unwrap();
        assert_eq!(second.handle(&stale), Resolution::Pending);
        assert_eq!(second.phase(), ResolutionPhase::Enumerating);
    }

    #[test]
    fn connection_failure_releases_subscriptions() {
        let (hub, _events) = EventHub::new();
        let mut resolver = resolver(&hub);
        assert_eq!(hub.active_subscriptions(), 2);
        resolver.connection_failed();
        assert!(resolver.phase().is_terminal());
        assert_eq!(hub.active_subscriptions(), 0);
    }
}
