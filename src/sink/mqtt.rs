//! MQTT publisher using rumqttc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};

use crate::config::mqtt_config::MqttConfig;
use crate::sink::{Publisher, Qos, SinkError};

/// rumqttc refuses keep-alive intervals below this.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Publishes over an `AsyncClient`. The rumqttc event loop runs on its own
/// task once connected, so publishing never waits on the network.
pub struct MqttPublisher {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    broker: String,
    connect_timeout: Duration,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("thingy-bridge-{}", std::process::id()));

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(
            config.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
        ));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, event_loop) = AsyncClient::new(options, config.request_capacity.max(1));

        Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            connected: Arc::new(AtomicBool::new(false)),
            broker: config.broker_addr(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Polls until the broker acknowledges the connection.
    async fn handshake(event_loop: &mut EventLoop) -> Result<(), String> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(format!("broker refused connection: {:?}", ack.code))
                    };
                }
                Ok(other) => debug!("MQTT event before CONNACK: {:?}", other),
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    /// Keeps the event loop turning so queued publishes reach the broker.
    async fn drive(mut event_loop: EventLoop, connected: Arc<AtomicBool>, broker: String) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => debug!("MQTT publish sent (pkid {})", pkid),
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT client disconnected from {}", broker);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection to {} lost: {}", broker, e);
                    break;
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn connect(&self) -> Result<(), SinkError> {
        let taken = self
            .event_loop
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut event_loop) = taken else {
            debug!("MQTT client already connected");
            return Ok(());
        };

        info!("MQTT connecting to {}....", self.broker);
        let outcome =
            match tokio::time::timeout(self.connect_timeout, Self::handshake(&mut event_loop)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => {
                    error!("Can not connect to MQTT broker {}: {}", self.broker, reason);
                    Err(SinkError::Connect {
                        broker: self.broker.clone(),
                        reason,
                    })
                }
                Err(_) => {
                    error!("Timed out connecting to MQTT broker {}", self.broker);
                    Err(SinkError::ConnectTimeout {
                        broker: self.broker.clone(),
                    })
                }
            };
        if let Err(e) = outcome {
            // Keep the event loop so a later connect can try again.
            *self
                .event_loop
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(event_loop);
            return Err(e);
        }

        info!("MQTT connection is Ok.");
        self.connected.store(true, Ordering::SeqCst);
        tokio::spawn(Self::drive(
            event_loop,
            self.connected.clone(),
            self.broker.clone(),
        ));
        Ok(())
    }

    fn publish(&self, topic: &str, message: &str, qos: Qos) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        self.client
            .try_publish(topic, qos.into(), false, message.as_bytes().to_vec())
            .map_err(|e| SinkError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}
