//! Notification handling for the matched characteristic.
//! Subscribes to its value changes, decodes each value and forwards the
//! rendered message to the publisher.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::core::bluetooth::bus::DeviceBus;
use crate::core::bluetooth::events::{EventFilter, EventHub, EventKind, PathScope, Subscription};
use crate::core::bluetooth::types::{BusEvent, LoopEvent, ObjectPath};
use crate::core::sensor::{Decoder, MessageFormatter};
use crate::error::SessionError;
use crate::sink::{Publisher, Qos};

/// Where decoded values go.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishTarget {
    pub topic: String,
    pub qos: Qos,
    pub formatter: MessageFormatter,
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Not a value change for the active subscription.
    Ignored,
    Published(String),
    DecodeFailed,
    PublishFailed,
}

/// Counters over the life of a bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub published: u64,
    pub decode_errors: u64,
    pub publish_errors: u64,
}

struct ActiveNotification {
    characteristic: ObjectPath,
    subscription: Subscription,
}

pub struct NotificationBridge {
    bus: Arc<dyn DeviceBus>,
    hub: EventHub,
    decoder: Box<dyn Decoder>,
    publisher: Arc<dyn Publisher>,
    target: PublishTarget,
    active: Option<ActiveNotification>,
    stats: BridgeStats,
}

impl NotificationBridge {
    pub fn new(
        bus: Arc<dyn DeviceBus>,
        hub: EventHub,
        decoder: Box<dyn Decoder>,
        publisher: Arc<dyn Publisher>,
        target: PublishTarget,
    ) -> Self {
        Self {
            bus,
            hub,
            decoder,
            publisher,
            target,
            active: None,
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Starts notifications on `characteristic`. Any previous subscription
    /// is dropped first so only one is ever active.
    pub async fn subscribe(&mut self, characteristic: &ObjectPath) -> Result<(), SessionError> {
        if self.active.is_some() {
            self.unsubscribe().await;
        }

        let mut subscription = self.hub.subscribe(
            EventFilter::new(EventKind::PropertiesChanged).scoped(PathScope::Exact(characteristic.clone())),
        );

        info!("Starting notifications");
        if let Err(e) = self.bus.start_notify(characteristic).await {
            error!("Failed to start notifications on {}", characteristic);
            error!("{}", e.code);
            error!("{}", e.message);
            subscription.release();
            return Err(SessionError::NotifyStartFailed {
                characteristic: characteristic.clone(),
                source: e,
            });
        }
        info!("Done starting notifications");

        self.active = Some(ActiveNotification {
            characteristic: characteristic.clone(),
            subscription,
        });
        Ok(())
    }

    /// Stops notifications. Does nothing when none are active.
    pub async fn unsubscribe(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.subscription.release();
        match self.bus.stop_notify(&active.characteristic).await {
            Ok(()) => info!("Stopped notifications on {}", active.characteristic),
            Err(e) => warn!("Failed to stop notifications on {}: {}", active.characteristic, e),
        }
    }

    pub fn handle(&mut self, event: &LoopEvent) -> Delivery {
        let Some(active) = &self.active else {
            return Delivery::Ignored;
        };
        let LoopEvent::Bus(BusEvent::PropertiesChanged { path, changes }) = event else {
            return Delivery::Ignored;
        };
        if *path != active.characteristic {
            return Delivery::Ignored;
        }
        let Some(value) = &changes.value else {
            return Delivery::Ignored;
        };

        debug!("Received value on {}: {:?}", path, value);
        let reading = match self.decoder.decode(value) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.decode_errors += 1;
                error!("Dropping sample {:02x?} from {}: {}", value, path, e);
                return Delivery::DecodeFailed;
            }
        };

        let message = self.target.formatter.render(&reading);
        info!("{}", message);
        match self.publisher.publish(&self.target.topic, &message, self.target.qos) {
            Ok(()) => {
                self.stats.published += 1;
                Delivery::Published(message)
            }
            Err(e) => {
                self.stats.publish_errors += 1;
                error!("Failed to publish to {}: {}", self.target.topic, e);
                Delivery::PublishFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::bus::BusError;
    use crate::core::bluetooth::constants::UUID_THINGY_TEMPERATURE_CHAR;
    use crate::core::bluetooth::matcher::CapabilityId;
    use crate::core::bluetooth::memory::{BusCall, MemoryBus};
    use crate::core::bluetooth::types::{Entity, PropertyChanges};
    use crate::core::sensor::ThingyTemperatureDecoder;
    use crate::sink::memory::MemoryPublisher;

    fn characteristic() -> ObjectPath {
        ObjectPath::new("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service001d/char001e")
    }

    fn setup() -> (EventHub, Arc<MemoryBus>, Arc<MemoryPublisher>, NotificationBridge) {
        let (hub, _events) = EventHub::new();
        let bus = Arc::new(MemoryBus::new(hub.clone()));
        bus.set_tree(
            ObjectPath::new("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"),
            vec![(
                characteristic(),
                Entity::Characteristic {
                    uuid: CapabilityId::from(UUID_THINGY_TEMPERATURE_CHAR),
                    flags: vec!["notify".into()],
                },
            )],
        );
        let publisher = Arc::new(MemoryPublisher::new());
        let bridge = NotificationBridge::new(
            bus.clone(),
            hub.clone(),
            Box::new(ThingyTemperatureDecoder),
            publisher.clone(),
            PublishTarget {
                topic: "thingy52".into(),
                qos: Qos::AtMostOnce,
                formatter: MessageFormatter::text(),
            },
        );
        (hub, bus, publisher, bridge)
    }

    fn value(payload: &[u8]) -> LoopEvent {
        LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: characteristic(),
            changes: PropertyChanges::value(payload),
        })
    }

    #[tokio::test]
    async fn decode_failure_drops_only_that_sample() {
        let (_hub, _bus, publisher, mut bridge) = setup();
        bridge.subscribe(&characteristic()).await.unwrap();

        assert_eq!(bridge.handle(&value(&[21])), Delivery::DecodeFailed);
        assert!(publisher.published().is_empty());

        assert_eq!(
            bridge.handle(&value(&[21, 50])),
            Delivery::Published("temperature: 21.5C".into())
        );
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "thingy52");
        assert_eq!(published[0].message, "temperature: 21.5C");
        assert_eq!(published[0].qos, Qos::AtMostOnce);
        assert_eq!(
            bridge.stats(),
            BridgeStats {
                published: 1,
                decode_errors: 1,
                publish_errors: 0
            }
        );
    }

    #[tokio::test]
    async fn publish_failure_keeps_subscription() {
        let (_hub, _bus, publisher, mut bridge) = setup();
        bridge.subscribe(&characteristic()).await.unwrap();

        publisher.set_fail_publish(true);
        assert_eq!(bridge.handle(&value(&[20, 0])), Delivery::PublishFailed);
        publisher.set_fail_publish(false);
        assert_eq!(
            bridge.handle(&value(&[20, 10])),
            Delivery::Published("temperature: 20.1C".into())
        );
        assert_eq!(bridge.stats().publish_errors, 1);
    }

    #[tokio::test]
    async fn notify_start_rejection_is_reported() {
        let (hub, bus, _publisher, mut bridge) = setup();
        bus.fail_next(
            BusCall::StartNotify(characteristic()),
            BusError::new("org.bluez.Error.NotPermitted", "Notify not permitted"),
        );

        let err = bridge.subscribe(&characteristic()).await.unwrap_err();
        match err {
            SessionError::NotifyStartFailed { characteristic: path, source } => {
                assert_eq!(path, characteristic());
                assert_eq!(source.code, "org.bluez.Error.NotPermitted");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn ignores_other_paths_and_non_value_changes() {
        let (_hub, _bus, publisher, mut bridge) = setup();
        assert_eq!(bridge.handle(&value(&[21, 0])), Delivery::Ignored);

        bridge.subscribe(&characteristic()).await.unwrap();
        let other = LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: ObjectPath::new("/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service001d/char001f"),
            changes: PropertyChanges::value(vec![1, 2]),
        });
        assert_eq!(bridge.handle(&other), Delivery::Ignored);
        let no_value = LoopEvent::Bus(BusEvent::PropertiesChanged {
            path: characteristic(),
            changes: PropertyChanges::connected(true),
        });
        assert_eq!(bridge.handle(&no_value), Delivery::Ignored);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (hub, bus, _publisher, mut bridge) = setup();
        bridge.subscribe(&characteristic()).await.unwrap();
        assert_eq!(hub.active_subscriptions(), 1);

        bridge.unsubscribe().await;
        bridge.unsubscribe().await;
        assert_eq!(hub.active_subscriptions(), 0);
        assert_eq!(bridge.handle(&value(&[21, 0])), Delivery::Ignored);
        let stops = bus
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BusCall::StopNotify(_)))
            .count();
        assert_eq!(stops, 1);
    }
}
