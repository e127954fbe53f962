use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{deliver, sender_for, Bus, BusError, BusMessage, BusResult, TopicMap};

/// Text frame exchanged with the relay hub. The payload is base64 so arbitrary
/// bytes survive the JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub topic: String,
    pub payload: String,
}

impl RelayFrame {
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            payload: STANDARD.encode(payload),
        }
    }

    pub fn decode_payload(&self) -> BusResult<Bytes> {
        STANDARD
            .decode(&self.payload)
            .map(Bytes::from)
            .map_err(|err| BusError::Transport(err.to_string()))
    }
}

/// Bus backed by a WebSocket relay hub. The hub fans every frame out to all
/// other connected peers; local subscribers see local publishes directly.
pub struct RelayBus {
    outbound: mpsc::UnboundedSender<String>,
    topics: Arc<TopicMap>,
    pump: JoinHandle<()>,
}

impl RelayBus {
    pub async fn connect(url: &str) -> BusResult<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|err| BusError::Transport(err.to_string()))?;
        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let topics: Arc<TopicMap> = Arc::new(parking_lot::RwLock::new(HashMap::new()));

        let inbound_topics = Arc::clone(&topics);
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = outbound_rx.recv() => {
                        let Some(text) = next else { break };
                        if let Err(err) = sink.send(Message::Text(text)).await {
                            warn!(target = "transport.relay", error = %err, "relay send failed");
                            break;
                        }
                    }
                    incoming = source.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                dispatch_inbound(&inbound_topics, &text);
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(err)) => {
                                warn!(target = "transport.relay", error = %err, "relay receive failed");
                                break;
                            }
                        }
                    }
                }
            }
            debug!(target = "transport.relay", "relay pump finished");
        });

        Ok(Self {
            outbound,
            topics,
            pump,
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.pump.is_finished()
    }
}

fn dispatch_inbound(topics: &TopicMap, text: &str) {
    let frame: RelayFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(target = "transport.relay", error = %err, "dropping malformed relay frame");
            return;
        }
    };
    match frame.decode_payload() {
        Ok(payload) => deliver(topics, &frame.topic, payload),
        Err(err) => {
            debug!(target = "transport.relay", topic = %frame.topic, error = %err, "dropping undecodable payload");
        }
    }
}

impl Bus for RelayBus {
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        sender_for(&self.topics, topic).subscribe()
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        let text = serde_json::to_string(&RelayFrame::new(topic, &payload))
            .map_err(|err| BusError::Transport(err.to_string()))?;
        self.outbound.send(text).map_err(|_| BusError::Closed)?;
        deliver(&self.topics, topic, payload);
        Ok(())
    }
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
