use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

#[cfg(feature = "relay")]
mod relay;
#[cfg(feature = "relay")]
pub use relay::{RelayBus, RelayFrame};

const TOPIC_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Topic-addressed broadcast channel shared by every participant of a
/// discovery domain. Publishing reaches all current subscribers of the topic,
/// including ones held by the publisher itself.
pub trait Bus: Send + Sync {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage>;
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;
}

type TopicMap = parking_lot::RwLock<HashMap<String, broadcast::Sender<BusMessage>>>;

fn sender_for(topics: &TopicMap, topic: &str) -> broadcast::Sender<BusMessage> {
    if let Some(sender) = topics.read().get(topic) {
        return sender.clone();
    }
    topics
        .write()
        .entry(topic.to_string())
        .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
        .clone()
}

/// Deliver to local subscribers. A topic nobody listens on drops the message,
/// the same way a broadcast channel without peers does.
fn deliver(topics: &TopicMap, topic: &str, payload: Bytes) {
    let sender = sender_for(topics, topic);
    let _ = sender.send(BusMessage {
        topic: topic.to_string(),
        payload,
    });
}

/// Simple in-memory bus for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: TopicMap,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        sender_for(&self.topics, topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        deliver(&self.topics, topic, payload);
        Ok(())
    }
}

/// Transport selected at runtime: in-process for tests and embedded use, or a
/// relay hub shared between processes.
#[derive(Clone)]
pub enum BusTransport {
    InMemory(Arc<LocalBus>),
    #[cfg(feature = "relay")]
    Relay(Arc<RelayBus>),
}

impl BusTransport {
    pub fn in_memory() -> Self {
        BusTransport::InMemory(Arc::new(LocalBus::new()))
    }

    #[cfg(feature = "relay")]
    pub async fn relay(url: &str) -> BusResult<Self> {
        Ok(BusTransport::Relay(Arc::new(RelayBus::connect(url).await?)))
    }
}

impl Bus for BusTransport {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        match self {
            BusTransport::InMemory(bus) => bus.subscribe(topic),
            #[cfg(feature = "relay")]
            BusTransport::Relay(bus) => bus.subscribe(topic),
        }
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        match self {
            BusTransport::InMemory(bus) => bus.publish(topic, payload),
            #[cfg(feature = "relay")]
            BusTransport::Relay(bus) => bus.publish(topic, payload),
        }
    }
}
