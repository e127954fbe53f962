use std::sync::Arc;
use std::time::Duration;

use playground_proto::{instance_topic, InstanceRequest};
use serde_json::Value;
use transport_bus::Bus;

use super::channel::{ChannelError, CorrelatedChannel};

/// Handle on a discovered instance. Owns the dedicated channel used to talk
/// to it; the channel closes when the last handle is dropped.
pub struct Instance<B: Bus> {
    uuid: String,
    url: Option<String>,
    channel: CorrelatedChannel<B>,
}

impl<B: Bus + 'static> Instance<B> {
    pub fn new(bus: Arc<B>, uuid: impl Into<String>, url: Option<String>, timeout: Duration) -> Self {
        let uuid = uuid.into();
        let channel = CorrelatedChannel::new(bus, instance_topic(&uuid)).with_timeout(timeout);
        Self { uuid, url, channel }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Location the instance reported when it announced itself.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub async fn list_actions(&self, timeout: Option<Duration>) -> Result<Value, ChannelError> {
        self.channel
            .send(InstanceRequest::list_actions(), timeout)
            .await
    }

    pub async fn execute(
        &self,
        action: &str,
        data: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ChannelError> {
        self.channel
            .send(InstanceRequest::action(action, data), timeout)
            .await
    }

    pub fn pending_requests(&self) -> usize {
        self.channel.pending()
    }
}

impl<B: Bus> std::fmt::Debug for Instance<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("uuid", &self.uuid)
            .field("url", &self.url)
            .finish()
    }
}
