use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Liveness check run against a running deployment before its URL is handed
/// out.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn is_alive(&self, url: &str) -> bool;
}

/// Any HTTP response counts as alive; only connection failures and timeouts
/// do not.
#[derive(Clone)]
pub struct HttpProbe {
    http: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn is_alive(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                debug!(target = "playground.recovery", %url, status = %response.status(), "probe answered");
                true
            }
            Err(err) => {
                debug!(target = "playground.recovery", %url, error = %err, "probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn any_response_is_alive() {
        let app = Router::new().route("/", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let probe = HttpProbe::new(DEFAULT_PROBE_TIMEOUT).unwrap();
        assert!(probe.is_alive(&format!("http://{addr}/")).await);
    }

    #[tokio::test]
    async fn refused_connection_is_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(Duration::from_millis(500)).unwrap();
        assert!(!probe.is_alive(&format!("http://{addr}/")).await);
    }
}
