use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use playground_core::recovery::{
    DeployOutcome, HttpProbe, RecoveryError, RecoveryLoop, RetryPolicy, SessionTarget,
};
use playground_proto::SessionConfiguration;
use playground_sdk::{PlaygroundClient, SdkError};
use serde_json::{json, Value};
use test_timeout::tokio_timeout_test;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Backend double that walks a created session through its phases, one per
/// read, and keeps deleted sessions visible for a couple of reads.
#[derive(Default)]
struct FakeBackend {
    state: Option<Value>,
    reads_since_create: u32,
    lingering_reads: u32,
    creates: u32,
    health_url: String,
}

impl FakeBackend {
    fn session_json(&self, state: Value) -> Value {
        json!({"result": {
            "id": "alice",
            "userId": "alice",
            "template": "node",
            "state": state,
            "maxDuration": 60
        }})
    }

    fn next_state(&mut self) -> Option<Value> {
        if self.lingering_reads > 0 {
            self.lingering_reads -= 1;
            return Some(json!({"tag": "Pending"}));
        }
        let state = self.state.clone()?;
        if state["tag"] == "Pending" {
            self.reads_since_create += 1;
            return Some(match self.reads_since_create {
                1 => json!({"tag": "Pending"}),
                2 => json!({"tag": "Building"}),
                _ => {
                    let running = json!({
                        "tag": "Running",
                        "url": self.health_url,
                        "startTime": 1_700_000_000_000u64,
                        "runtimeConfiguration": {}
                    });
                    self.state = Some(running.clone());
                    running
                }
            });
        }
        Some(state)
    }
}

type Shared = Arc<Mutex<FakeBackend>>;

async fn get_session(State(backend): State<Shared>, Path(_id): Path<String>) -> Json<Value> {
    let mut backend = backend.lock();
    match backend.next_state() {
        Some(state) => Json(backend.session_json(state)),
        None => Json(json!({})),
    }
}

async fn put_session(State(backend): State<Shared>, Path(id): Path<String>) -> impl IntoResponse {
    let mut backend = backend.lock();
    if backend.state.is_some() || backend.lingering_reads > 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("Session {id} already exists")})),
        );
    }
    backend.creates += 1;
    backend.reads_since_create = 0;
    backend.state = Some(json!({"tag": "Pending"}));
    (StatusCode::OK, Json(json!({"result": null})))
}

async fn delete_session(State(backend): State<Shared>) -> Json<Value> {
    let mut backend = backend.lock();
    backend.state = None;
    backend.lingering_reads = 2;
    Json(json!({"result": null}))
}

async fn spawn_backend(initial: Option<Value>) -> (PlaygroundClient, Shared, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let health_url = format!("http://{addr}/health");
    let shared: Shared = Arc::new(Mutex::new(FakeBackend {
        state: initial,
        health_url: health_url.clone(),
        ..FakeBackend::default()
    }));
    let router = Router::new()
        .route(
            "/api/sessions/:id",
            get(get_session).put(put_session).delete(delete_session),
        )
        .route("/health", get(|| async { "ok" }))
        .with_state(shared.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let client =
        PlaygroundClient::new(format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
    (client, shared, health_url)
}

fn fast_loop(
    client: PlaygroundClient,
) -> RecoveryLoop<SessionTarget<PlaygroundClient>, HttpProbe> {
    RecoveryLoop::new(
        SessionTarget::new(Arc::new(client), "alice"),
        HttpProbe::new(Duration::from_secs(2)).unwrap(),
        CancellationToken::new(),
    )
    .with_policy(RetryPolicy {
        max_retries: 50,
        interval: Duration::from_millis(10),
    })
}

#[tokio_timeout_test(20)]
async fn fresh_session_is_created_and_probed() {
    let (client, backend, health_url) = spawn_backend(None).await;

    let outcome = fast_loop(client)
        .deploy(SessionConfiguration::for_template("node"))
        .await
        .unwrap();
    match outcome {
        DeployOutcome::Started(endpoint) => {
            assert_eq!(endpoint.url, health_url);
            assert!(endpoint.state.is_running());
        }
        DeployOutcome::Conflict(_) => panic!("no session existed"),
    }
    assert_eq!(backend.lock().creates, 1);
}

#[tokio_timeout_test(20)]
async fn existing_session_is_replaced_only_on_request() {
    let (client, backend, health_url) = spawn_backend(Some(json!({"tag": "Paused"}))).await;

    let outcome = fast_loop(client)
        .deploy(SessionConfiguration::for_template("node"))
        .await
        .unwrap();
    let conflict = match outcome {
        DeployOutcome::Conflict(conflict) => conflict,
        DeployOutcome::Started(_) => panic!("existing session must conflict"),
    };
    assert_eq!(conflict.existing().phase(), "Paused");
    assert_eq!(backend.lock().creates, 0);

    let endpoint = conflict.replace().await.unwrap();
    assert_eq!(endpoint.url, health_url);
    let backend = backend.lock();
    assert_eq!(backend.creates, 1);
    assert_eq!(backend.lingering_reads, 0);
}

#[tokio_timeout_test(20)]
async fn failed_session_reports_remote_reason() {
    let (client, _backend, _) =
        spawn_backend(Some(json!({"tag": "Failed", "reason": "OOMKilled"}))).await;

    let err = fast_loop(client).watch().await.unwrap_err();
    assert!(matches!(&err, RecoveryError::Failed { reason } if reason == "OOMKilled"));
}

#[tokio_timeout_test(20)]
async fn unauthorized_backend_is_surfaced() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new().route(
        "/api/sessions/:id",
        get(|| async { StatusCode::UNAUTHORIZED }),
    );
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let client =
        PlaygroundClient::new(format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();

    let err = fast_loop(client).watch().await.unwrap_err();
    assert!(matches!(err, RecoveryError::Backend(SdkError::Unauthorized)));
    assert_eq!(err.to_string(), "User unauthorized");
}
