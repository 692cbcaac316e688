//! Publisher that keeps messages in memory. Used for dry runs, where
//! values are logged instead of sent to a broker. Only the most recent
//! messages are kept.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::info;

use crate::sink::{Publisher, Qos, SinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub message: String,
    pub qos: Qos,
}

pub const DEFAULT_RETAINED: usize = 256;

#[derive(Debug)]
pub struct MemoryPublisher {
    published: Mutex<VecDeque<PublishedMessage>>,
    retained: usize,
    total: AtomicU64,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    fail_publish: AtomicBool,
}

impl Default for MemoryPublisher {
    fn default() -> Self {
        Self::retaining(DEFAULT_RETAINED)
    }
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `retained` messages, dropping the oldest first.
    pub fn retaining(retained: usize) -> Self {
        Self {
            published: Mutex::new(VecDeque::with_capacity(retained.min(DEFAULT_RETAINED))),
            retained,
            total: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// A publisher whose `connect` always fails.
    pub fn refusing() -> Self {
        let publisher = Self::default();
        publisher.refuse_connect.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The retained messages, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.messages().iter().cloned().collect()
    }

    /// Messages accepted since creation, retained or not.
    pub fn published_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    fn messages(&self) -> MutexGuard<'_, VecDeque<PublishedMessage>> {
        self.published.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn connect(&self) -> Result<(), SinkError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SinkError::Connect {
                broker: "memory".into(),
                reason: "connection refused".into(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn publish(&self, topic: &str, message: &str, qos: Qos) -> Result<(), SinkError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SinkError::Publish {
                topic: topic.to_string(),
                reason: "publish rejected".into(),
            });
        }
        info!("[{}] {}", topic, message);
        self.total.fetch_add(1, Ordering::SeqCst);
        if self.retained == 0 {
            return Ok(());
        }
        let mut messages = self.messages();
        if messages.len() == self.retained {
            messages.pop_front();
        }
        messages.push_back(PublishedMessage {
            topic: topic.to_string(),
            message: message.to_string(),
            qos,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_most_recent_messages() {
        let publisher = MemoryPublisher::retaining(3);
        for i in 0..5 {
            publisher.publish("thingy52", &format!("temperature: {}C", i), Qos::AtMostOnce).unwrap();
        }

        let kept: Vec<_> = publisher.published().into_iter().map(|m| m.message).collect();
        assert_eq!(kept, vec!["temperature: 2C", "temperature: 3C", "temperature: 4C"]);
        assert_eq!(publisher.published_count(), 5);
    }

    #[test]
    fn rejected_publish_is_not_counted() {
        let publisher = MemoryPublisher::new();
        publisher.set_fail_publish(true);
        assert!(publisher.publish("thingy52", "temperature: 21C", Qos::AtMostOnce).is_err());
        assert_eq!(publisher.published_count(), 0);
        assert!(publisher.published().is_empty());
    }
}
