use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use playground_proto::{AnswerKind, InstanceAnswer, InstanceFrame, InstanceRequest};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use transport_bus::{Bus, BusError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{message}")]
    Timeout { message: String },
    #[error("remote error: {0}")]
    Remote(Value),
    #[error("instance is offline")]
    Offline,
    #[error("transport error: {0}")]
    Transport(#[from] BusError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("channel closed before an answer arrived")]
    Closed,
}

impl ChannelError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelError::Timeout { .. } => "timeout",
            ChannelError::Remote(_) => "remote",
            ChannelError::Offline => "offline",
            ChannelError::Transport(_) | ChannelError::Encode(_) => "transport",
            ChannelError::Closed => "closed",
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<InstanceAnswer>>>>;

/// Request/answer correlation over one bus topic.
///
/// Each request registers a waiter keyed by its id before it is published, so
/// an answer arriving on the very next poll is never missed. The waiter is
/// removed exactly once: by the pump when the answer arrives, or by the caller
/// on timeout or cancellation. Answers for unknown ids are dropped.
pub struct CorrelatedChannel<B: Bus> {
    bus: Arc<B>,
    topic: String,
    pending: PendingMap,
    default_timeout: Duration,
    pump: JoinHandle<()>,
}

impl<B: Bus + 'static> CorrelatedChannel<B> {
    pub fn new(bus: Arc<B>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let rx = bus.subscribe(&topic);
        let pump = tokio::spawn(pump_answers(rx, topic.clone(), Arc::clone(&pending)));
        Self {
            bus,
            topic,
            pending,
            default_timeout: DEFAULT_TIMEOUT,
            pump,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Requests still waiting for an answer.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Publishes `request` and waits for the answer carrying its id.
    pub async fn send(
        &self,
        request: InstanceRequest,
        timeout: Option<Duration>,
    ) -> Result<Value, ChannelError> {
        let id = request.uuid.clone();
        let payload = InstanceFrame::Request(request).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _waiter = WaiterGuard {
            pending: &self.pending,
            id: &id,
        };

        self.bus.publish(&self.topic, Bytes::from(payload))?;

        let window = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(window, rx).await {
            Ok(Ok(answer)) => answer_into_result(answer),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                debug!(target = "playground.connect", topic = %self.topic, request_id = %id, "request timed out");
                Err(ChannelError::Timeout {
                    message: format!("no answer within {}ms", window.as_millis()),
                })
            }
        }
    }
}

impl<B: Bus> Drop for CorrelatedChannel<B> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct WaiterGuard<'a> {
    pending: &'a PendingMap,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

fn answer_into_result(answer: InstanceAnswer) -> Result<Value, ChannelError> {
    match answer.kind {
        AnswerKind::Ok => Ok(answer.data),
        AnswerKind::Error => Err(ChannelError::Remote(answer.data)),
        AnswerKind::Offline => Err(ChannelError::Offline),
    }
}

async fn pump_answers(
    mut rx: broadcast::Receiver<transport_bus::BusMessage>,
    topic: String,
    pending: PendingMap,
) {
    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(target = "playground.connect", %topic, skipped, "answer pump lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match InstanceFrame::decode(&msg.payload) {
            Ok(InstanceFrame::Answer(answer)) => {
                let waiter = pending.lock().remove(&answer.uuid);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(answer);
                    }
                    None => {
                        debug!(target = "playground.connect", %topic, request_id = %answer.uuid, "dropping answer without a waiting request");
                    }
                }
            }
            Ok(InstanceFrame::Request(_)) => {
                trace!(target = "playground.connect", %topic, "ignoring request frame");
            }
            Err(err) => {
                debug!(target = "playground.connect", %topic, error = %err, "dropping undecodable frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playground_proto::RequestKind;
    use serde_json::json;
    use transport_bus::LocalBus;

    const TOPIC: &str = "playground.instance.test";

    /// Answers every request on the topic with `reply(request)` (if `Some`),
    /// publishing each answer `copies` times.
    fn spawn_peer<F>(bus: Arc<LocalBus>, copies: usize, reply: F) -> JoinHandle<()>
    where
        F: Fn(&InstanceRequest) -> Option<InstanceAnswer> + Send + 'static,
    {
        let mut rx = bus.subscribe(TOPIC);
        tokio::spawn(async move {
            while let Ok(msg) = rx.recv().await {
                if let Ok(InstanceFrame::Request(request)) = InstanceFrame::decode(&msg.payload) {
                    if let Some(answer) = reply(&request) {
                        let bytes = InstanceFrame::Answer(answer).encode().unwrap();
                        for _ in 0..copies {
                            bus.publish(TOPIC, Bytes::from(bytes.clone())).unwrap();
                        }
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn resolves_with_matching_answer_and_clears_waiter() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus.clone(), TOPIC);
        let _peer = spawn_peer(bus.clone(), 2, |req| {
            Some(InstanceAnswer::ok(req, json!({"kind": format!("{:?}", req.kind)})))
        });

        let value = channel
            .send(InstanceRequest::list_actions(), None)
            .await
            .expect("answer");
        assert_eq!(value["kind"], "List");
        assert_eq!(channel.pending(), 0);

        // The duplicate copy lands after resolution and must not disturb anything.
        tokio::task::yield_now().await;
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn remote_error_rejects() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus.clone(), TOPIC);
        let _peer = spawn_peer(bus.clone(), 1, |req| {
            Some(InstanceAnswer::error(req, json!("unknown action")))
        });

        let err = channel
            .send(InstanceRequest::action("deploy", json!({})), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "remote");
        assert!(matches!(err, ChannelError::Remote(data) if data == json!("unknown action")));
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn offline_answer_rejects() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus.clone(), TOPIC);
        let _peer = spawn_peer(bus.clone(), 1, |req| Some(InstanceAnswer::offline(req)));

        let err = channel
            .send(InstanceRequest::list_actions(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Offline));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_answer_and_ignores_late_arrival() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus.clone(), TOPIC);
        let request = InstanceRequest::new(RequestKind::Exec, Some("slow".into()), None);
        let late = InstanceAnswer::ok(&request, json!("too late"));

        let err = channel.send(request, None).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.to_string(), "no answer within 5000ms");
        assert_eq!(channel.pending(), 0);

        let bytes = InstanceFrame::Answer(late).encode().unwrap();
        bus.publish(TOPIC, Bytes::from(bytes)).unwrap();
        tokio::task::yield_now().await;
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_overrides_default() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus, TOPIC).with_timeout(Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        let err = channel
            .send(InstanceRequest::list_actions(), Some(Duration::from_millis(250)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropped_caller_releases_waiter() {
        let bus = Arc::new(LocalBus::new());
        let channel = CorrelatedChannel::new(bus, TOPIC);
        {
            let fut = channel.send(InstanceRequest::list_actions(), None);
            tokio::pin!(fut);
            assert!(futures_util::poll!(fut.as_mut()).is_pending());
            assert_eq!(channel.pending(), 1);
        }
        assert_eq!(channel.pending(), 0);
    }
}
