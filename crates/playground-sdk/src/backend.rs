use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use playground_proto::{
    Playground, RuntimeState, Session, SessionConfiguration, Template, User, Workspace,
    WorkspaceConfiguration,
};
use tokio::sync::Mutex;

use crate::{PlaygroundClient, SdkError, SdkResult};

/// Backend operations driven by the session lifecycle and recovery loops.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_details(&self) -> SdkResult<Playground>;

    async fn get_user(&self, id: &str) -> SdkResult<Option<User>>;

    async fn list_templates(&self) -> SdkResult<Vec<Template>>;

    async fn get_session(&self, id: &str) -> SdkResult<Option<Session>>;

    async fn create_session(&self, id: &str, conf: &SessionConfiguration) -> SdkResult<()>;

    async fn delete_session(&self, id: &str) -> SdkResult<()>;

    async fn get_workspace(&self, id: &str) -> SdkResult<Option<Workspace>>;

    async fn create_workspace(&self, id: &str, conf: &WorkspaceConfiguration) -> SdkResult<()>;

    async fn delete_workspace(&self, id: &str) -> SdkResult<()>;
}

#[async_trait]
impl Backend for PlaygroundClient {
    async fn get_details(&self) -> SdkResult<Playground> {
        PlaygroundClient::get_details(self).await
    }

    async fn get_user(&self, id: &str) -> SdkResult<Option<User>> {
        PlaygroundClient::get_user(self, id).await
    }

    async fn list_templates(&self) -> SdkResult<Vec<Template>> {
        PlaygroundClient::list_templates(self).await
    }

    async fn get_session(&self, id: &str) -> SdkResult<Option<Session>> {
        PlaygroundClient::get_session(self, id).await
    }

    async fn create_session(&self, id: &str, conf: &SessionConfiguration) -> SdkResult<()> {
        PlaygroundClient::create_session(self, id, conf).await
    }

    async fn delete_session(&self, id: &str) -> SdkResult<()> {
        PlaygroundClient::delete_session(self, id).await
    }

    async fn get_workspace(&self, id: &str) -> SdkResult<Option<Workspace>> {
        PlaygroundClient::get_workspace(self, id).await
    }

    async fn create_workspace(&self, id: &str, conf: &WorkspaceConfiguration) -> SdkResult<()> {
        PlaygroundClient::create_workspace(self, id, conf).await
    }

    async fn delete_workspace(&self, id: &str) -> SdkResult<()> {
        PlaygroundClient::delete_workspace(self, id).await
    }
}

/// Call log entry recorded by [`InMemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendCall {
    GetDetails,
    GetUser(String),
    ListTemplates,
    GetSession(String),
    CreateSession(String),
    DeleteSession(String),
    GetWorkspace(String),
    CreateWorkspace(String),
    DeleteWorkspace(String),
}

/// In-memory adapter for tests and offline wiring.
///
/// Reads of a session or workspace consume a per-id script first, so a test
/// can replay the phases a real backend would report (`None` = absent). Once
/// the script is drained the stored record is returned.
#[derive(Default)]
pub struct InMemoryBackend {
    details: Mutex<Option<Playground>>,
    users: Mutex<HashMap<String, User>>,
    templates: Mutex<Vec<Template>>,
    sessions: Mutex<HashMap<String, Session>>,
    workspaces: Mutex<HashMap<String, Workspace>>,
    session_scripts: Mutex<HashMap<String, VecDeque<Option<RuntimeState>>>>,
    workspace_scripts: Mutex<HashMap<String, VecDeque<Option<RuntimeState>>>>,
    failures: Mutex<HashMap<BackendCall, String>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl InMemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_details(&self, details: Playground) {
        *self.details.lock().await = Some(details);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.lock().await.insert(user.id.clone(), user);
    }

    pub async fn set_templates(&self, templates: Vec<Template>) {
        *self.templates.lock().await = templates;
    }

    pub async fn insert_session(&self, session: Session) {
        self.sessions.lock().await.insert(session.id.clone(), session);
    }

    pub async fn insert_workspace(&self, workspace: Workspace) {
        self.workspaces
            .lock()
            .await
            .insert(workspace.id.clone(), workspace);
    }

    pub async fn script_session(
        &self,
        id: &str,
        states: impl IntoIterator<Item = Option<RuntimeState>>,
    ) {
        self.session_scripts
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .extend(states);
    }

    pub async fn script_workspace(
        &self,
        id: &str,
        states: impl IntoIterator<Item = Option<RuntimeState>>,
    ) {
        self.workspace_scripts
            .lock()
            .await
            .entry(id.to_string())
            .or_default()
            .extend(states);
    }

    /// Makes every matching call fail with `message` until cleared.
    pub async fn fail_on(&self, call: BackendCall, message: impl Into<String>) {
        self.failures.lock().await.insert(call, message.into());
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, call: &BackendCall) -> usize {
        self.calls.lock().await.iter().filter(|c| *c == call).count()
    }

    async fn record(&self, call: BackendCall) -> SdkResult<()> {
        let failure = self.failures.lock().await.get(&call).cloned();
        self.calls.lock().await.push(call);
        match failure {
            Some(message) => Err(SdkError::Remote(message)),
            None => Ok(()),
        }
    }
}

fn scripted_step(
    scripts: &mut HashMap<String, VecDeque<Option<RuntimeState>>>,
    id: &str,
) -> Option<Option<RuntimeState>> {
    scripts.get_mut(id).and_then(VecDeque::pop_front)
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_details(&self) -> SdkResult<Playground> {
        self.record(BackendCall::GetDetails).await?;
        self.details
            .lock()
            .await
            .clone()
            .ok_or_else(|| SdkError::Remote("details unavailable".into()))
    }

    async fn get_user(&self, id: &str) -> SdkResult<Option<User>> {
        self.record(BackendCall::GetUser(id.to_string())).await?;
        Ok(self.users.lock().await.get(id).cloned())
    }

    async fn list_templates(&self) -> SdkResult<Vec<Template>> {
        self.record(BackendCall::ListTemplates).await?;
        Ok(self.templates.lock().await.clone())
    }

    async fn get_session(&self, id: &str) -> SdkResult<Option<Session>> {
        self.record(BackendCall::GetSession(id.to_string())).await?;
        let step = scripted_step(&mut *self.session_scripts.lock().await, id);
        let mut sessions = self.sessions.lock().await;
        match step {
            Some(Some(state)) => {
                let session = sessions.entry(id.to_string()).or_insert_with(|| Session {
                    id: id.to_string(),
                    user_id: id.to_string(),
                    template: None,
                    state: state.clone(),
                    max_duration: 60,
                });
                session.state = state;
                Ok(Some(session.clone()))
            }
            Some(None) => {
                sessions.remove(id);
                Ok(None)
            }
            None => Ok(sessions.get(id).cloned()),
        }
    }

    async fn create_session(&self, id: &str, conf: &SessionConfiguration) -> SdkResult<()> {
        self.record(BackendCall::CreateSession(id.to_string()))
            .await?;
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(id) {
            return Err(SdkError::Remote(format!("Session {id} already exists")));
        }
        sessions.insert(
            id.to_string(),
            Session {
                id: id.to_string(),
                user_id: id.to_string(),
                template: Some(conf.template.clone()),
                state: RuntimeState::Pending,
                max_duration: conf.duration.unwrap_or(60),
            },
        );
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> SdkResult<()> {
        self.record(BackendCall::DeleteSession(id.to_string()))
            .await?;
        match self.sessions.lock().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(SdkError::Remote(format!("Unknown session {id}"))),
        }
    }

    async fn get_workspace(&self, id: &str) -> SdkResult<Option<Workspace>> {
        self.record(BackendCall::GetWorkspace(id.to_string())).await?;
        let step = scripted_step(&mut *self.workspace_scripts.lock().await, id);
        let mut workspaces = self.workspaces.lock().await;
        match step {
            Some(Some(state)) => match workspaces.get_mut(id) {
                Some(workspace) => {
                    workspace.state = state;
                    Ok(Some(workspace.clone()))
                }
                None => Err(SdkError::Remote(format!(
                    "script for unknown workspace {id}"
                ))),
            },
            Some(None) => {
                workspaces.remove(id);
                Ok(None)
            }
            None => Ok(workspaces.get(id).cloned()),
        }
    }

    async fn create_workspace(&self, id: &str, conf: &WorkspaceConfiguration) -> SdkResult<()> {
        self.record(BackendCall::CreateWorkspace(id.to_string()))
            .await?;
        let mut workspaces = self.workspaces.lock().await;
        if workspaces.contains_key(id) {
            return Err(SdkError::Remote(format!("Workspace {id} already exists")));
        }
        workspaces.insert(
            id.to_string(),
            Workspace {
                id: id.to_string(),
                user_id: id.to_string(),
                repository_details: conf.repository_details.clone(),
                state: RuntimeState::Init,
                max_duration: conf.duration.unwrap_or(60),
            },
        );
        Ok(())
    }

    async fn delete_workspace(&self, id: &str) -> SdkResult<()> {
        self.record(BackendCall::DeleteWorkspace(id.to_string()))
            .await?;
        match self.workspaces.lock().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(SdkError::Remote(format!("Unknown workspace {id}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_phases_replay_before_stored_state() {
        let backend = InMemoryBackend::new();
        backend
            .create_session("alice", &SessionConfiguration::for_template("node"))
            .await
            .unwrap();
        backend
            .script_session("alice", [Some(RuntimeState::Init), None])
            .await;

        let first = backend.get_session("alice").await.unwrap().unwrap();
        assert_eq!(first.state, RuntimeState::Init);
        assert!(backend.get_session("alice").await.unwrap().is_none());
        assert!(backend.get_session("alice").await.unwrap().is_none());
        assert_eq!(
            backend
                .count(&BackendCall::GetSession("alice".into()))
                .await,
            3
        );
    }

    #[tokio::test]
    async fn duplicate_session_is_rejected() {
        let backend = InMemoryBackend::new();
        let conf = SessionConfiguration::for_template("node");
        backend.create_session("alice", &conf).await.unwrap();
        let err = backend.create_session("alice", &conf).await.unwrap_err();
        assert!(matches!(err, SdkError::Remote(_)));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let backend = InMemoryBackend::new();
        backend
            .fail_on(BackendCall::ListTemplates, "catalog offline")
            .await;
        let err = backend.list_templates().await.unwrap_err();
        assert_eq!(err.to_string(), "catalog offline");
        assert_eq!(backend.calls().await, vec![BackendCall::ListTemplates]);
    }
}
