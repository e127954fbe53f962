//! WebSocket hub that lets [`transport_bus::RelayBus`] peers in different
//! processes share topics. Every valid frame is forwarded to all other peers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use transport_bus::RelayFrame;
use uuid::Uuid;

const PEER_CHANNEL_DEPTH: usize = 64;

#[derive(Clone, Default)]
pub struct RelayHub {
    peers: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Message>>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
    }

    /// Serves until `shutdown` resolves.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
    }

    fn register(&self) -> (Uuid, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(PEER_CHANNEL_DEPTH);
        let id = Uuid::new_v4();
        self.peers.write().insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: &Uuid) {
        self.peers.write().remove(id);
    }

    /// Returns how many peers accepted the frame. Slow peers whose queue is
    /// full miss it.
    fn forward(&self, from: &Uuid, text: &str) -> usize {
        let peers: Vec<(Uuid, mpsc::Sender<Message>)> = self
            .peers
            .read()
            .iter()
            .filter(|(id, _)| *id != from)
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        let mut delivered = 0;
        for (id, tx) in peers {
            match tx.try_send(Message::Text(text.to_string())) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(target = "playground.relay", peer = %id, error = %err, "dropping frame for peer");
                }
            }
        }
        delivered
    }
}

async fn health_handler(State(hub): State<RelayHub>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "peers": hub.peer_count() }))
}

async fn ws_handler(State(hub): State<RelayHub>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, hub))
}

async fn handle_connection(socket: WebSocket, hub: RelayHub) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (peer, mut rx) = hub.register();
    info!(target = "playground.relay", %peer, peers = hub.peer_count(), "peer connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<RelayFrame>(&text) {
                Ok(frame) => {
                    let delivered = hub.forward(&peer, &text);
                    debug!(target = "playground.relay", %peer, topic = %frame.topic, delivered, "frame forwarded");
                }
                Err(err) => {
                    warn!(target = "playground.relay", %peer, error = %err, "ignoring malformed frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(target = "playground.relay", %peer, error = %err, "error receiving frame");
                break;
            }
        }
    }

    hub.unregister(&peer);
    writer.abort();
    info!(target = "playground.relay", %peer, peers = hub.peer_count(), "peer disconnected");
}
