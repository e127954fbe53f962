//! Discovery and request/answer messaging between controllers and the
//! instances they drive, over any [`transport_bus::Bus`].

mod channel;
mod discoverer;
mod instance;
mod responder;

pub use channel::{ChannelError, CorrelatedChannel, DEFAULT_TIMEOUT};
pub use discoverer::{DiscoveryEvent, DiscoveryListener, Discoverer, FnListener};
pub use instance::Instance;
pub use responder::{InstanceMessageHandler, Replier, Responder};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use playground_proto::{InstanceAnswer, InstanceRequest, RequestKind};
    use serde_json::json;
    use test_timeout::tokio_timeout_test;
    use tokio::sync::mpsc;
    use transport_bus::LocalBus;

    fn echo_handler(request: InstanceRequest, replier: &Replier<LocalBus>) {
        let answer = match request.kind {
            RequestKind::List => InstanceAnswer::ok(&request, json!(["open", "close"])),
            RequestKind::Exec if request.name.as_deref() == Some("open") => {
                InstanceAnswer::ok(&request, request.data.clone().unwrap_or_default())
            }
            RequestKind::Exec => InstanceAnswer::error(&request, json!("unknown action")),
        };
        replier.respond(&answer).unwrap();
    }

    async fn wait_appeared(
        events: &mut mpsc::UnboundedReceiver<DiscoveryEvent<LocalBus>>,
    ) -> Arc<Instance<LocalBus>> {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("no discovery event")
                .expect("listener alive");
            if let DiscoveryEvent::Appeared(instance) = event {
                return instance;
            }
        }
    }

    #[tokio_timeout_test(10)]
    async fn announced_responder_is_registered() {
        let bus = Arc::new(LocalBus::new());
        let (tx, mut events) = mpsc::unbounded_channel();
        let discoverer = Discoverer::new(bus.clone(), tx).unwrap();
        let responder = Responder::new(bus.clone(), "abc", None, echo_handler);

        responder.announce().unwrap();
        let instance = wait_appeared(&mut events).await;
        assert_eq!(instance.uuid(), "abc");
        assert!(discoverer.contains("abc"));
    }

    #[tokio_timeout_test(10)]
    async fn late_discoverer_learns_about_online_responder() {
        let bus = Arc::new(LocalBus::new());
        let responder = Responder::new(bus.clone(), "abc", None, echo_handler);
        responder.announce().unwrap();

        let (tx, mut events) = mpsc::unbounded_channel();
        let discoverer = Discoverer::new(bus.clone(), tx).unwrap();
        let instance = wait_appeared(&mut events).await;
        assert_eq!(instance.uuid(), "abc");
        assert_eq!(discoverer.len(), 1);
    }

    #[tokio_timeout_test(10)]
    async fn discovered_instance_executes_actions() {
        let bus = Arc::new(LocalBus::new());
        let (tx, mut events) = mpsc::unbounded_channel();
        let _discoverer = Discoverer::new(bus.clone(), tx).unwrap();
        let responder = Responder::new(bus.clone(), "abc", None, echo_handler);
        responder.announce().unwrap();
        let instance = wait_appeared(&mut events).await;

        let actions = instance.list_actions(None).await.unwrap();
        assert_eq!(actions, json!(["open", "close"]));

        let opened = instance
            .execute("open", json!({"path": "/src"}), None)
            .await
            .unwrap();
        assert_eq!(opened, json!({"path": "/src"}));

        let err = instance.execute("explode", json!({}), None).await.unwrap_err();
        assert_eq!(err.kind(), "remote");

        responder.set_status(false);
        let err = instance.list_actions(None).await.unwrap_err();
        assert!(matches!(err, ChannelError::Offline));
        assert_eq!(instance.pending_requests(), 0);
    }

    #[tokio_timeout_test(10)]
    async fn closure_listener_sees_departures() {
        let bus = Arc::new(LocalBus::new());
        let (left_tx, mut left_rx) = mpsc::unbounded_channel::<String>();
        let listener = FnListener::new(
            |_: &Arc<Instance<LocalBus>>| {},
            move |uuid: &str| {
                let _ = left_tx.send(uuid.to_string());
            },
        );
        let discoverer = Discoverer::new(bus.clone(), listener).unwrap();
        let responder = Responder::new(bus.clone(), "abc", None, echo_handler);

        responder.announce().unwrap();
        responder.unannounce().unwrap();
        let uuid = tokio::time::timeout(Duration::from_secs(2), left_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(uuid, "abc");
        assert!(discoverer.is_empty());
    }
}
