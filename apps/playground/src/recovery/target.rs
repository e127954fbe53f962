use std::sync::Arc;

use async_trait::async_trait;
use playground_proto::{RuntimeState, SessionConfiguration, WorkspaceConfiguration};
use playground_sdk::{Backend, SdkResult};

/// A backend resource whose phase the recovery loop follows.
#[async_trait]
pub trait Tracked: Send + Sync {
    type Conf: Send + Sync;

    /// `"session"` or `"workspace"`, used in logs.
    fn kind(&self) -> &'static str;

    fn id(&self) -> &str;

    /// Current phase, or `None` when the resource does not exist.
    async fn state(&self) -> SdkResult<Option<RuntimeState>>;

    async fn create(&self, conf: &Self::Conf) -> SdkResult<()>;

    async fn delete(&self) -> SdkResult<()>;
}

pub struct SessionTarget<B: Backend + ?Sized> {
    backend: Arc<B>,
    id: String,
}

impl<B: Backend + ?Sized> SessionTarget<B> {
    pub fn new(backend: Arc<B>, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Tracked for SessionTarget<B> {
    type Conf = SessionConfiguration;

    fn kind(&self) -> &'static str {
        "session"
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> SdkResult<Option<RuntimeState>> {
        let session = self.backend.get_session(&self.id).await?;
        Ok(session.map(|session| session.state))
    }

    async fn create(&self, conf: &SessionConfiguration) -> SdkResult<()> {
        self.backend.create_session(&self.id, conf).await
    }

    async fn delete(&self) -> SdkResult<()> {
        self.backend.delete_session(&self.id).await
    }
}

pub struct WorkspaceTarget<B: Backend + ?Sized> {
    backend: Arc<B>,
    id: String,
}

impl<B: Backend + ?Sized> WorkspaceTarget<B> {
    pub fn new(backend: Arc<B>, id: impl Into<String>) -> Self {
        Self {
            backend,
            id: id.into(),
        }
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Tracked for WorkspaceTarget<B> {
    type Conf = WorkspaceConfiguration;

    fn kind(&self) -> &'static str {
        "workspace"
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> SdkResult<Option<RuntimeState>> {
        let workspace = self.backend.get_workspace(&self.id).await?;
        Ok(workspace.map(|workspace| workspace.state))
    }

    async fn create(&self, conf: &WorkspaceConfiguration) -> SdkResult<()> {
        self.backend.create_workspace(&self.id, conf).await
    }

    async fn delete(&self) -> SdkResult<()> {
        self.backend.delete_workspace(&self.id).await
    }
}
