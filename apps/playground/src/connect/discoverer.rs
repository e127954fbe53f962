use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use playground_proto::{DiscoveryMessage, TOPIC_DISCOVERY};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use transport_bus::{Bus, BusError, BusMessage, BusResult};

use super::channel::DEFAULT_TIMEOUT;
use super::instance::Instance;

pub trait DiscoveryListener<B: Bus>: Send + Sync + 'static {
    /// Called for every announcement, including repeated ones for an
    /// instance that is already registered.
    fn instance_appeared(&self, instance: &Arc<Instance<B>>);

    fn instance_left(&self, uuid: &str);
}

/// Listener assembled from two closures.
pub struct FnListener<A, L> {
    appeared: A,
    left: L,
}

impl<A, L> FnListener<A, L> {
    pub fn new(appeared: A, left: L) -> Self {
        Self { appeared, left }
    }
}

impl<B, A, L> DiscoveryListener<B> for FnListener<A, L>
where
    B: Bus + 'static,
    A: Fn(&Arc<Instance<B>>) + Send + Sync + 'static,
    L: Fn(&str) + Send + Sync + 'static,
{
    fn instance_appeared(&self, instance: &Arc<Instance<B>>) {
        (self.appeared)(instance)
    }

    fn instance_left(&self, uuid: &str) {
        (self.left)(uuid)
    }
}

pub enum DiscoveryEvent<B: Bus> {
    Appeared(Arc<Instance<B>>),
    Left(String),
}

impl<B: Bus + 'static> DiscoveryListener<B> for mpsc::UnboundedSender<DiscoveryEvent<B>> {
    fn instance_appeared(&self, instance: &Arc<Instance<B>>) {
        let _ = self.send(DiscoveryEvent::Appeared(Arc::clone(instance)));
    }

    fn instance_left(&self, uuid: &str) {
        let _ = self.send(DiscoveryEvent::Left(uuid.to_string()));
    }
}

type Registry<B> = Arc<RwLock<HashMap<String, Arc<Instance<B>>>>>;

/// Tracks the instances announcing themselves on the shared discovery topic.
///
/// The registry is only mutated from the pump task, one message at a time.
/// `close` stops listening but leaves handles already given out usable; an
/// instance channel closes when its last handle is dropped.
pub struct Discoverer<B: Bus> {
    registry: Registry<B>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Bus + 'static> Discoverer<B> {
    pub fn new<L: DiscoveryListener<B>>(bus: Arc<B>, listener: L) -> BusResult<Self> {
        Self::with_timeout(bus, listener, DEFAULT_TIMEOUT)
    }

    /// Like [`Discoverer::new`], with `timeout` as the default request window
    /// of every instance handle it creates.
    pub fn with_timeout<L: DiscoveryListener<B>>(
        bus: Arc<B>,
        listener: L,
        timeout: Duration,
    ) -> BusResult<Self> {
        let registry: Registry<B> = Arc::new(RwLock::new(HashMap::new()));
        let rx = bus.subscribe(TOPIC_DISCOVERY);
        let pump = tokio::spawn(pump_discovery(
            rx,
            Arc::clone(&bus),
            Arc::clone(&registry),
            listener,
            timeout,
        ));

        let ping = DiscoveryMessage::Discovery
            .encode()
            .map_err(|err| BusError::Transport(err.to_string()))?;
        if let Err(err) = bus.publish(TOPIC_DISCOVERY, Bytes::from(ping)) {
            pump.abort();
            return Err(err);
        }
        debug!(target = "playground.discovery", "discovery announcement sent");

        Ok(Self {
            registry,
            pump: Mutex::new(Some(pump)),
        })
    }

    pub fn instance(&self, uuid: &str) -> Option<Arc<Instance<B>>> {
        self.registry.read().get(uuid).cloned()
    }

    pub fn instances(&self) -> Vec<Arc<Instance<B>>> {
        self.registry.read().values().cloned().collect()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.registry.read().contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    /// Releases the discovery subscription. Idempotent.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
            debug!(target = "playground.discovery", "discoverer closed");
        }
    }
}

impl<B: Bus> Drop for Discoverer<B> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn pump_discovery<B, L>(
    mut rx: broadcast::Receiver<BusMessage>,
    bus: Arc<B>,
    registry: Registry<B>,
    listener: L,
    timeout: Duration,
) where
    B: Bus + 'static,
    L: DiscoveryListener<B>,
{
    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target = "playground.discovery", skipped, "discovery listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let message = match DiscoveryMessage::decode(&msg.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(target = "playground.discovery", error = %err, "ignoring unknown discovery message");
                continue;
            }
        };
        match message {
            DiscoveryMessage::InstanceAnnounced { uuid, url } => {
                let known = registry.read().get(&uuid).cloned();
                let instance = match known {
                    Some(instance) => instance,
                    None => {
                        let instance = Arc::new(Instance::new(
                            Arc::clone(&bus),
                            uuid.clone(),
                            url,
                            timeout,
                        ));
                        registry.write().insert(uuid.clone(), Arc::clone(&instance));
                        info!(target = "playground.discovery", instance = %uuid, "instance registered");
                        instance
                    }
                };
                listener.instance_appeared(&instance);
            }
            DiscoveryMessage::InstanceLeft { uuid } => {
                let removed = registry.write().remove(&uuid);
                if removed.is_some() {
                    info!(target = "playground.discovery", instance = %uuid, "instance left");
                    listener.instance_left(&uuid);
                }
            }
            DiscoveryMessage::Discovery => {}
        }
    }
}
