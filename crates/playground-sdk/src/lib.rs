//! Asynchronous client for the playground backend.
//!
//! One typed client covers the whole JSON contract: every reply is a
//! `{result}` / `{error}` envelope, 401 collapses to a fixed unauthorized
//! error, and non-2xx replies without a JSON body fall back to the status
//! reason. The lifecycle and recovery loops consume the [`Backend`] subset so
//! they can run against [`InMemoryBackend`] in tests.

mod backend;
mod environment;

pub use backend::{Backend, BackendCall, InMemoryBackend};
pub use environment::{resolve_base_url, Environment, UnknownEnvironment};

use std::future::Future;
use std::time::Duration;

use playground_proto::{
    Playground, Repository, RepositoryConfiguration, RepositoryUpdateConfiguration, RpcEnvelope,
    Session, SessionConfiguration, SessionUpdateConfiguration, Template, User, UserConfiguration,
    UserUpdateConfiguration, Workspace, WorkspaceConfiguration,
};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("User unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Remote(String),
    #[error("{text}")]
    Status { status: StatusCode, text: String },
    #[error("request timed out")]
    Timeout,
    #[error("http request failed: {0}")]
    Http(reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SdkError::Timeout
        } else {
            SdkError::Http(err)
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

/// Runs `fut` until it completes or `token` fires. Cancellation drops the
/// future, which aborts any request it has in flight.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> SdkResult<T>
where
    F: Future<Output = SdkResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SdkError::Cancelled),
        result = fut => result,
    }
}

#[derive(Clone)]
pub struct PlaygroundClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl PlaygroundClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SdkResult<Self> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn for_environment(env: Environment) -> SdkResult<Self> {
        Self::new(resolve_base_url(env, None), DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_details(&self) -> SdkResult<Playground> {
        self.call::<Playground, ()>(Method::GET, "/", None)
            .await?
            .ok_or_else(|| SdkError::Remote("empty details".into()))
    }

    pub async fn login(&self, bearer: &str) -> SdkResult<()> {
        let mut url = reqwest::Url::parse(&format!("{}/login", self.base_url))
            .map_err(|err| SdkError::Remote(err.to_string()))?;
        url.query_pairs_mut().append_pair("bearer", bearer);
        let path = format!("/login?{}", url.query().unwrap_or_default());
        self.call_unit::<()>(Method::POST, &path, None).await
    }

    pub async fn logout(&self) -> SdkResult<()> {
        self.call_unit::<()>(Method::GET, "/logout", None).await
    }

    pub async fn list_users(&self) -> SdkResult<Vec<User>> {
        self.list("/users").await
    }

    pub async fn get_user(&self, id: &str) -> SdkResult<Option<User>> {
        self.call::<User, ()>(Method::GET, &format!("/users/{id}"), None)
            .await
    }

    pub async fn create_user(&self, id: &str, conf: &UserConfiguration) -> SdkResult<()> {
        self.call_unit(Method::PUT, &format!("/users/{id}"), Some(conf))
            .await
    }

    pub async fn update_user(&self, id: &str, conf: &UserUpdateConfiguration) -> SdkResult<()> {
        self.call_unit(Method::PATCH, &format!("/users/{id}"), Some(conf))
            .await
    }

    pub async fn delete_user(&self, id: &str) -> SdkResult<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/users/{id}"), None)
            .await
    }

    pub async fn list_repositories(&self) -> SdkResult<Vec<Repository>> {
        self.list("/repositories").await
    }

    pub async fn get_repository(&self, id: &str) -> SdkResult<Option<Repository>> {
        self.call::<Repository, ()>(Method::GET, &format!("/repositories/{id}"), None)
            .await
    }

    pub async fn create_repository(
        &self,
        id: &str,
        conf: &RepositoryConfiguration,
    ) -> SdkResult<()> {
        self.call_unit(Method::PUT, &format!("/repositories/{id}"), Some(conf))
            .await
    }

    pub async fn update_repository(
        &self,
        id: &str,
        conf: &RepositoryUpdateConfiguration,
    ) -> SdkResult<()> {
        self.call_unit(Method::PATCH, &format!("/repositories/{id}"), Some(conf))
            .await
    }

    pub async fn delete_repository(&self, id: &str) -> SdkResult<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/repositories/{id}"), None)
            .await
    }

    pub async fn list_templates(&self) -> SdkResult<Vec<Template>> {
        self.list("/templates").await
    }

    pub async fn list_sessions(&self) -> SdkResult<Vec<Session>> {
        self.list("/sessions").await
    }

    pub async fn get_session(&self, id: &str) -> SdkResult<Option<Session>> {
        self.call::<Session, ()>(Method::GET, &format!("/sessions/{id}"), None)
            .await
    }

    pub async fn create_session(&self, id: &str, conf: &SessionConfiguration) -> SdkResult<()> {
        self.call_unit(Method::PUT, &format!("/sessions/{id}"), Some(conf))
            .await
    }

    pub async fn update_session(
        &self,
        id: &str,
        conf: &SessionUpdateConfiguration,
    ) -> SdkResult<()> {
        self.call_unit(Method::PATCH, &format!("/sessions/{id}"), Some(conf))
            .await
    }

    pub async fn delete_session(&self, id: &str) -> SdkResult<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/sessions/{id}"), None)
            .await
    }

    pub async fn list_workspaces(&self) -> SdkResult<Vec<Workspace>> {
        self.list("/workspaces").await
    }

    pub async fn get_workspace(&self, id: &str) -> SdkResult<Option<Workspace>> {
        self.call::<Workspace, ()>(Method::GET, &format!("/workspaces/{id}"), None)
            .await
    }

    pub async fn create_workspace(
        &self,
        id: &str,
        conf: &WorkspaceConfiguration,
    ) -> SdkResult<()> {
        self.call_unit(Method::PUT, &format!("/workspaces/{id}"), Some(conf))
            .await
    }

    pub async fn delete_workspace(&self, id: &str) -> SdkResult<()> {
        self.call_unit::<()>(Method::DELETE, &format!("/workspaces/{id}"), None)
            .await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> SdkResult<Vec<T>> {
        Ok(self
            .call::<Vec<T>, ()>(Method::GET, path, None)
            .await?
            .unwrap_or_default())
    }

    async fn call_unit<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> SdkResult<()> {
        self.call::<serde_json::Value, B>(method, path, body)
            .await
            .map(|_| ())
    }

    async fn call<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> SdkResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(target = "playground.sdk", %method, %url, "backend call");
        let mut request = self.http.request(method, url).timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SdkError::Unauthorized);
        }
        let bytes = response.bytes().await?;
        decode_reply(status, &bytes)
    }
}

fn decode_reply<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> SdkResult<Option<T>> {
    if status.is_success() && bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<RpcEnvelope<T>>(bytes) {
        Ok(envelope) if status.is_success() => envelope.into_result().map_err(SdkError::Remote),
        Ok(RpcEnvelope {
            error: Some(error), ..
        }) => Err(SdkError::Remote(error)),
        Ok(_) => Err(status_error(status)),
        Err(err) if status.is_success() => Err(SdkError::Decode(err)),
        Err(_) => Err(status_error(status)),
    }
}

fn status_error(status: StatusCode) -> SdkError {
    SdkError::Status {
        status,
        text: status
            .canonical_reason()
            .unwrap_or("Unknown status")
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, put};
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> PlaygroundClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        PlaygroundClient::new(format!("http://{addr}/api"), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn get_session_decodes_result() {
        let router = Router::new().route(
            "/api/sessions/:id",
            get(|| async {
                Json(json!({"result": {
                    "id": "alice",
                    "userId": "alice",
                    "template": "node-template",
                    "state": {"tag": "Pending"},
                    "maxDuration": 60
                }}))
            }),
        );
        let client = serve(router).await;
        let session = client.get_session("alice").await.unwrap().expect("session");
        assert_eq!(session.template.as_deref(), Some("node-template"));
    }

    #[tokio::test]
    async fn absent_result_is_none() {
        let router = Router::new().route("/api/sessions/:id", get(|| async { Json(json!({})) }));
        let client = serve(router).await;
        assert!(client.get_session("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unauthorized_hides_details() {
        let router = Router::new().route(
            "/api/users",
            get(|| async {
                (
                    AxumStatus::UNAUTHORIZED,
                    Json(json!({"error": "token expired at 12:00"})),
                )
                    .into_response()
            }),
        );
        let client = serve(router).await;
        let err = client.list_users().await.unwrap_err();
        assert!(matches!(err, SdkError::Unauthorized));
        assert_eq!(err.to_string(), "User unauthorized");
    }

    #[tokio::test]
    async fn remote_error_is_surfaced() {
        let router = Router::new().route(
            "/api/sessions/:id",
            put(|| async {
                (
                    AxumStatus::BAD_REQUEST,
                    Json(json!({"error": "Unknown template"})),
                )
                    .into_response()
            }),
        );
        let client = serve(router).await;
        let err = client
            .create_session("alice", &SessionConfiguration::for_template("nope"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown template");
    }

    #[tokio::test]
    async fn non_json_failure_uses_status_text() {
        let router = Router::new().route(
            "/api/sessions/:id",
            delete(|| async { (AxumStatus::BAD_GATEWAY, "<html>upstream</html>").into_response() }),
        );
        let client = serve(router).await;
        let err = client.delete_session("alice").await.unwrap_err();
        match err {
            SdkError::Status { status, text } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(text, "Bad Gateway");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_success_body_is_accepted() {
        let router = Router::new().route("/api/sessions/:id", delete(|| async { "" }));
        let client = serve(router).await;
        client.delete_session("alice").await.expect("delete ok");
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let router = Router::new().route(
            "/api/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Json(json!({}))
            }),
        );
        let client = serve(router).await;
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = cancellable(&token, client.get_details()).await.unwrap_err();
        assert!(matches!(err, SdkError::Cancelled));
    }
}
