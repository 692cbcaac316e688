//! One run of the bridge: scan, resolve the chosen device, stream its
//! values. The session owns the dispatcher queue; every handler runs to
//! completion on it before the next event is taken.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::bluetooth::bus::DeviceBus;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::BLUEZ_ROOT;
use crate::core::bluetooth::device::{normalize_address, DiscoveredDevice};
use crate::core::bluetooth::events::{EventFilter, EventHub, EventKind, PathScope};
use crate::core::bluetooth::notification::{BridgeStats, NotificationBridge, PublishTarget};
use crate::core::bluetooth::resolver::{Resolution, Resolver};
use crate::core::bluetooth::scanner::{DiscoveryController, ScanProgress, ScanState};
use crate::core::bluetooth::types::{BusEvent, DeviceAttributes, LoopEvent, ObjectPath};
use crate::core::sensor::{MessageFormatter, ThingyTemperatureDecoder};
use crate::error::SessionError;
use crate::sink::Publisher;

/// A connected device that exposes the required capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDevice {
    pub device: ObjectPath,
    pub service: ObjectPath,
    pub characteristic: ObjectPath,
    pub characteristic_flags: Vec<String>,
    pub attributes: Option<DeviceAttributes>,
}

/// Why streaming ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Shutdown,
    DeviceDisconnected,
}

pub struct Session {
    bus: Arc<dyn DeviceBus>,
    hub: EventHub,
    events: UnboundedReceiver<LoopEvent>,
    publisher: Arc<dyn Publisher>,
    config: AppConfig,
    discovery: DiscoveryController,
    connections: ConnectionManager,
}

impl Session {
    pub fn new(
        bus: Arc<dyn DeviceBus>,
        hub: EventHub,
        events: UnboundedReceiver<LoopEvent>,
        publisher: Arc<dyn Publisher>,
        config: AppConfig,
    ) -> Self {
        let discovery = DiscoveryController::new(bus.clone(), hub.clone());
        let connections = ConnectionManager::new(bus.clone(), BLUEZ_ROOT, config.bluetooth.adapter.clone());
        Self {
            bus,
            hub,
            events,
            publisher,
            config,
            discovery,
            connections,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Devices currently in the registry.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.discovery.snapshot()
    }

    async fn next_event(&mut self) -> Result<LoopEvent, SessionError> {
        self.events.recv().await.ok_or(SessionError::QueueClosed)
    }

    /// Lists known devices, scans for the configured window and returns
    /// the final device list. Once the scan has run, later calls return
    /// that list again without scanning.
    pub async fn discover(&mut self) -> Result<Vec<DiscoveredDevice>, SessionError> {
        if self.discovery.state() == ScanState::Stopped {
            info!("Scan already done, reusing its device list");
            return Ok(self.discovery.snapshot());
        }
        self.discovery.seed_known_devices().await?;
        self.discovery.start(self.config.scan_duration()).await?;

        loop {
            let event = self.next_event().await?;
            if self.discovery.handle(&event).await == ScanProgress::Finished {
                break;
            }
        }
        // Events queued before the scan stopped still count.
        while let Ok(event) = self.events.try_recv() {
            self.discovery.handle(&event).await;
        }

        let devices = self.discovery.snapshot();
        info!("Full list of devices {} discovered:", devices.len());
        for device in &devices {
            info!("{}", device);
        }
        Ok(devices)
    }

    /// Connects to the device at `address` and waits for it to report its
    /// service tree, then checks it for the configured capability.
    pub async fn resolve(&mut self, address: &str) -> Result<ResolvedDevice, SessionError> {
        let expected = self.connections.resolve_path(address)?;
        let seen = normalize_address(address).and_then(|a| self.discovery.registry().find_by_address(&a));
        let device = match seen {
            Some(seen) => {
                if seen.path != expected {
                    debug!("{} was seen at {} rather than {}", address, seen.path, expected);
                }
                seen.path
            }
            None => {
                warn!("{} was not seen during the scan", address);
                expected
            }
        };

        let sensor = &self.config.sensor;
        let mut resolver = Resolver::new(
            &self.hub,
            device.clone(),
            sensor.service_uuid,
            sensor.characteristic_uuid,
        );

        if let Err(e) = self.connections.connect(&device).await {
            resolver.connection_failed();
            return Err(e);
        }
        let attributes = self.connections.device_info(&device).await;
        let timeout = self.config.enumeration_timeout();
        resolver.connection_established(timeout);

        loop {
            let event = self.next_event().await?;
            match resolver.handle(&event) {
                Resolution::Pending => {}
                Resolution::Resolved {
                    service,
                    characteristic,
                } => {
                    return Ok(ResolvedDevice {
                        device,
                        service,
                        characteristic,
                        characteristic_flags: resolver.state().characteristic_flags.clone(),
                        attributes,
                    });
                }
                Resolution::Rejected {
                    service_found,
                    characteristic_found,
                } => {
                    self.connections.disconnect(&device).await;
                    return Err(SessionError::CapabilityNotFound {
                        service_found,
                        characteristic_found,
                    });
                }
                Resolution::TimedOut => {
                    self.connections.disconnect(&device).await;
                    return Err(SessionError::EnumerationTimedOut {
                        device,
                        timeout: timeout.unwrap_or_default(),
                    });
                }
            }
        }
    }

    /// Publishes every value of the resolved characteristic until
    /// `shutdown` is cancelled or the device drops the connection.
    pub async fn stream(
        &mut self,
        resolved: &ResolvedDevice,
        shutdown: CancellationToken,
    ) -> Result<(StreamEnd, BridgeStats), SessionError> {
        info!("MQTT connecting....");
        self.publisher.connect().await.map_err(|e| {
            error!("Message sink unavailable: {}", e);
            SessionError::SinkUnavailable(e)
        })?;

        let sensor = &self.config.sensor;
        let target = PublishTarget {
            topic: sensor.topic.clone(),
            qos: sensor.qos,
            formatter: MessageFormatter::new(sensor.payload_format, sensor.measurement.clone(), sensor.tags.clone()),
        };
        let mut bridge = NotificationBridge::new(
            self.bus.clone(),
            self.hub.clone(),
            Box::new(ThingyTemperatureDecoder),
            self.publisher.clone(),
            target,
        );

        let mut link = self.hub.subscribe(
            EventFilter::new(EventKind::PropertiesChanged).scoped(PathScope::Exact(resolved.device.clone())),
        );
        bridge.subscribe(&resolved.characteristic).await?;

        let end = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping notifications");
                    break StreamEnd::Shutdown;
                }
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Err(SessionError::QueueClosed);
                    };
                    if let LoopEvent::Bus(BusEvent::PropertiesChanged { path, changes }) = &event {
                        if *path == resolved.device && changes.connected == Some(false) {
                            warn!("{} disconnected", path);
                            break StreamEnd::DeviceDisconnected;
                        }
                    }
                    bridge.handle(&event);
                }
            }
        };

        link.release();
        bridge.unsubscribe().await;
        if end == StreamEnd::Shutdown {
            self.connections.disconnect(&resolved.device).await;
        }

        let stats = bridge.stats();
        info!(
            "Streaming ended: {} published, {} decode errors, {} publish errors",
            stats.published, stats.decode_errors, stats.publish_errors
        );
        Ok((end, stats))
    }
}
