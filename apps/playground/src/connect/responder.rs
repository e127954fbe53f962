use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use playground_proto::{
    instance_topic, DiscoveryMessage, InstanceAnswer, InstanceFrame, InstanceRequest,
    TOPIC_DISCOVERY,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use transport_bus::{Bus, BusError, BusMessage, BusResult};

/// Receives the requests addressed to a responder's instance.
///
/// Called from the responder's pump task; long running work should be moved
/// onto a task holding a clone of the [`Replier`].
pub trait InstanceMessageHandler<B: Bus>: Send + Sync + 'static {
    fn on_request(&self, request: InstanceRequest, replier: &Replier<B>);
}

impl<B, F> InstanceMessageHandler<B> for F
where
    B: Bus,
    F: Fn(InstanceRequest, &Replier<B>) + Send + Sync + 'static,
{
    fn on_request(&self, request: InstanceRequest, replier: &Replier<B>) {
        self(request, replier)
    }
}

/// Publishes answers on one instance topic.
pub struct Replier<B: Bus> {
    bus: Arc<B>,
    topic: String,
}

impl<B: Bus> Clone for Replier<B> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            topic: self.topic.clone(),
        }
    }
}

impl<B: Bus> Replier<B> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn respond(&self, answer: &InstanceAnswer) -> BusResult<()> {
        let payload = InstanceFrame::Answer(answer.clone())
            .encode()
            .map_err(|err| BusError::Transport(err.to_string()))?;
        self.bus.publish(&self.topic, Bytes::from(payload))
    }
}

#[derive(Clone)]
struct Identity {
    uuid: String,
    url: Option<String>,
}

/// The instance side of discovery: announces itself on the shared topic and
/// serves requests on its own topic.
pub struct Responder<B: Bus> {
    bus: Arc<B>,
    identity: Identity,
    online: Arc<AtomicBool>,
    replier: Replier<B>,
    pump: JoinHandle<()>,
}

impl<B: Bus + 'static> Responder<B> {
    /// Starts listening immediately but stays offline until [`Responder::announce`].
    pub fn new<H: InstanceMessageHandler<B>>(
        bus: Arc<B>,
        uuid: impl Into<String>,
        url: Option<String>,
        handler: H,
    ) -> Self {
        let identity = Identity {
            uuid: uuid.into(),
            url,
        };
        let online = Arc::new(AtomicBool::new(false));
        let replier = Replier {
            bus: Arc::clone(&bus),
            topic: instance_topic(&identity.uuid),
        };

        let discovery_rx = bus.subscribe(TOPIC_DISCOVERY);
        let instance_rx = bus.subscribe(&replier.topic);
        let pump = tokio::spawn(pump_responder(
            discovery_rx,
            instance_rx,
            Arc::clone(&bus),
            identity.clone(),
            Arc::clone(&online),
            replier.clone(),
            handler,
        ));

        Self {
            bus,
            identity,
            online,
            replier,
            pump,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.identity.uuid
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Flips the online flag without telling anyone.
    pub fn set_status(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn announce(&self) -> BusResult<()> {
        self.set_status(true);
        publish_announcement(&*self.bus, &self.identity)?;
        info!(target = "playground.responder", instance = %self.identity.uuid, "instance announced");
        Ok(())
    }

    pub fn unannounce(&self) -> BusResult<()> {
        self.set_status(false);
        let message = DiscoveryMessage::InstanceLeft {
            uuid: self.identity.uuid.clone(),
        };
        publish_discovery(&*self.bus, &message)?;
        info!(target = "playground.responder", instance = %self.identity.uuid, "instance left");
        Ok(())
    }

    pub fn respond(&self, answer: &InstanceAnswer) -> BusResult<()> {
        self.replier.respond(answer)
    }

    pub fn replier(&self) -> Replier<B> {
        self.replier.clone()
    }
}

impl<B: Bus> Drop for Responder<B> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn publish_discovery<B: Bus>(bus: &B, message: &DiscoveryMessage) -> BusResult<()> {
    let payload = message
        .encode()
        .map_err(|err| BusError::Transport(err.to_string()))?;
    bus.publish(TOPIC_DISCOVERY, Bytes::from(payload))
}

fn publish_announcement<B: Bus>(bus: &B, identity: &Identity) -> BusResult<()> {
    publish_discovery(
        bus,
        &DiscoveryMessage::InstanceAnnounced {
            uuid: identity.uuid.clone(),
            url: identity.url.clone(),
        },
    )
}

async fn pump_responder<B, H>(
    mut discovery_rx: broadcast::Receiver<BusMessage>,
    mut instance_rx: broadcast::Receiver<BusMessage>,
    bus: Arc<B>,
    identity: Identity,
    online: Arc<AtomicBool>,
    replier: Replier<B>,
    handler: H,
) where
    B: Bus + 'static,
    H: InstanceMessageHandler<B>,
{
    loop {
        tokio::select! {
            received = discovery_rx.recv() => match received {
                Ok(msg) => handle_discovery(&msg, &*bus, &identity, &online),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target = "playground.responder", skipped, "discovery receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            received = instance_rx.recv() => match received {
                Ok(msg) => handle_instance(&msg, &identity, &online, &replier, &handler),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target = "playground.responder", skipped, "instance receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

fn handle_discovery<B: Bus>(msg: &BusMessage, bus: &B, identity: &Identity, online: &AtomicBool) {
    match DiscoveryMessage::decode(&msg.payload) {
        Ok(DiscoveryMessage::Discovery) => {
            if !online.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = publish_announcement(bus, identity) {
                warn!(target = "playground.responder", instance = %identity.uuid, error = %err, "re-announce failed");
            } else {
                debug!(target = "playground.responder", instance = %identity.uuid, "answered discovery");
            }
        }
        Ok(_) => {}
        Err(err) => {
            debug!(target = "playground.responder", error = %err, "ignoring unknown discovery message");
        }
    }
}

fn handle_instance<B, H>(
    msg: &BusMessage,
    identity: &Identity,
    online: &AtomicBool,
    replier: &Replier<B>,
    handler: &H,
) where
    B: Bus,
    H: InstanceMessageHandler<B>,
{
    let request = match InstanceFrame::decode(&msg.payload) {
        Ok(InstanceFrame::Request(request)) => request,
        Ok(InstanceFrame::Answer(_)) => {
            trace!(target = "playground.responder", instance = %identity.uuid, "ignoring answer frame");
            return;
        }
        Err(err) => {
            debug!(target = "playground.responder", instance = %identity.uuid, error = %err, "dropping undecodable frame");
            return;
        }
    };

    if online.load(Ordering::SeqCst) {
        handler.on_request(request, replier);
    } else if let Err(err) = replier.respond(&InstanceAnswer::offline(&request)) {
        warn!(target = "playground.responder", instance = %identity.uuid, error = %err, "failed to send offline answer");
    }
}
