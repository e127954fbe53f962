use std::future::Future;
use std::time::Duration;

use playground_proto::RuntimeState;
use playground_sdk::{cancellable, SdkError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::probe::Probe;
use super::target::Tracked;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    /// Five minutes at one check per second.
    fn default() -> Self {
        Self {
            max_retries: 300,
            interval: Duration::from_millis(1_000),
        }
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("{reason}")]
    Failed { reason: String },
    #[error("timed out waiting for the deployment")]
    Timeout,
    #[error(transparent)]
    Backend(SdkError),
    #[error("recovery cancelled")]
    Cancelled,
}

impl From<SdkError> for RecoveryError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::Cancelled => RecoveryError::Cancelled,
            other => RecoveryError::Backend(other),
        }
    }
}

/// A running deployment that answered its liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub state: RuntimeState,
}

/// Follows one session or workspace until it is reachable.
pub struct RecoveryLoop<T, P> {
    target: T,
    probe: P,
    policy: RetryPolicy,
    cancel: CancellationToken,
    host: Option<String>,
}

impl<T: Tracked, P: Probe> RecoveryLoop<T, P> {
    pub fn new(target: T, probe: P, cancel: CancellationToken) -> Self {
        Self {
            target,
            probe,
            policy: RetryPolicy::default(),
            cancel,
            host: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Host used to build `https://<id>.<host>` when a running deployment
    /// reports no URL of its own.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Polls until the deployment runs and answers the probe.
    ///
    /// A `Failed` phase ends the loop at once with the remote reason. Every
    /// other outcome, including a running deployment that fails its probe,
    /// costs one retry.
    pub async fn watch(&self) -> Result<Endpoint, RecoveryError> {
        let mut retries = 0;
        loop {
            let state = self.call(self.target.state()).await?;
            match state {
                Some(RuntimeState::Failed { reason }) => {
                    warn!(target = "playground.recovery", kind = self.target.kind(), id = self.target.id(), %reason, "deployment failed");
                    return Err(RecoveryError::Failed { reason });
                }
                Some(state @ RuntimeState::Running { .. }) => match self.access_url(&state) {
                    Some(url) => {
                        if self.reachable(&url).await? {
                            info!(target = "playground.recovery", kind = self.target.kind(), id = self.target.id(), %url, "deployment reachable");
                            return Ok(Endpoint { url, state });
                        }
                        debug!(target = "playground.recovery", id = self.target.id(), %url, "running but not reachable yet");
                    }
                    None => {
                        debug!(target = "playground.recovery", id = self.target.id(), "running without an access url");
                    }
                },
                Some(state) => {
                    debug!(target = "playground.recovery", id = self.target.id(), phase = state.phase(), retries, "waiting");
                }
                None => {
                    debug!(target = "playground.recovery", id = self.target.id(), retries, "not found yet");
                }
            }

            retries += 1;
            if retries >= self.policy.max_retries {
                warn!(target = "playground.recovery", kind = self.target.kind(), id = self.target.id(), retries, "giving up");
                return Err(RecoveryError::Timeout);
            }
            self.pause().await?;
        }
    }

    /// Creates the deployment unless one already exists, in which case the
    /// caller decides through the returned [`Conflict`].
    pub async fn deploy(self, conf: T::Conf) -> Result<DeployOutcome<T, P>, RecoveryError> {
        if let Some(existing) = self.call(self.target.state()).await? {
            info!(target = "playground.recovery", kind = self.target.kind(), id = self.target.id(), phase = existing.phase(), "deployment already exists");
            return Ok(DeployOutcome::Conflict(Conflict {
                inner: self,
                conf,
                existing,
            }));
        }
        self.create_and_watch(&conf).await.map(DeployOutcome::Started)
    }

    async fn create_and_watch(&self, conf: &T::Conf) -> Result<Endpoint, RecoveryError> {
        self.call(self.target.create(conf)).await?;
        info!(target = "playground.recovery", kind = self.target.kind(), id = self.target.id(), "deployment requested");
        self.watch().await
    }

    async fn wait_absent(&self) -> Result<(), RecoveryError> {
        let mut retries = 0;
        loop {
            if self.call(self.target.state()).await?.is_none() {
                return Ok(());
            }
            retries += 1;
            if retries >= self.policy.max_retries {
                return Err(RecoveryError::Timeout);
            }
            self.pause().await?;
        }
    }

    fn access_url(&self, state: &RuntimeState) -> Option<String> {
        match state {
            RuntimeState::Running { url: Some(url), .. } => Some(url.clone()),
            RuntimeState::Running { url: None, .. } => self
                .host
                .as_ref()
                .map(|host| format!("https://{}.{}", self.target.id(), host)),
            _ => None,
        }
    }

    async fn call<F, R>(&self, fut: F) -> Result<R, RecoveryError>
    where
        F: Future<Output = Result<R, SdkError>>,
    {
        cancellable(&self.cancel, fut).await.map_err(RecoveryError::from)
    }

    async fn reachable(&self, url: &str) -> Result<bool, RecoveryError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RecoveryError::Cancelled),
            alive = self.probe.is_alive(url) => Ok(alive),
        }
    }

    async fn pause(&self) -> Result<(), RecoveryError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RecoveryError::Cancelled),
            _ = tokio::time::sleep(self.policy.interval) => Ok(()),
        }
    }
}

pub enum DeployOutcome<T: Tracked, P> {
    Started(Endpoint),
    Conflict(Conflict<T, P>),
}

/// A deployment was requested while another one exists. Nothing is created
/// until [`Conflict::replace`] is called.
pub struct Conflict<T: Tracked, P> {
    inner: RecoveryLoop<T, P>,
    conf: T::Conf,
    existing: RuntimeState,
}

impl<T: Tracked, P: Probe> Conflict<T, P> {
    pub fn existing(&self) -> &RuntimeState {
        &self.existing
    }

    pub fn target(&self) -> &T {
        self.inner.target()
    }

    /// Deletes the existing deployment, waits for it to disappear, then
    /// creates the requested one and watches it.
    pub async fn replace(self) -> Result<Endpoint, RecoveryError> {
        let target = &self.inner.target;
        info!(target = "playground.recovery", kind = target.kind(), id = target.id(), "replacing existing deployment");
        self.inner.call(target.delete()).await?;
        self.inner.wait_absent().await?;
        self.inner.create_and_watch(&self.conf).await
    }

    /// Keeps the existing deployment and watches it instead.
    pub async fn keep(self) -> Result<Endpoint, RecoveryError> {
        self.inner.watch().await
    }
}
