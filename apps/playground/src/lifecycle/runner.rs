use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use playground_proto::SessionConfiguration;
use playground_sdk::{cancellable, Backend, SdkError, SdkResult};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{
    transition, Effect, LifecycleContext, LifecycleEvent, LifecycleState, Transition,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("lifecycle cancelled")]
    Cancelled,
}

/// What observers of a [`LifecycleRunner`] see after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: LifecycleState,
    pub context: LifecycleContext,
    /// Set once a created instance has been handed off.
    pub navigated: bool,
}

/// Drives the lifecycle machine against a backend.
///
/// Each call applies one input and then runs the requested effects, feeding
/// the events they produce back into [`transition`], until nothing is left
/// to do. Every backend call and every poll delay races the cancellation
/// token; a cancelled runner stops where it is.
pub struct LifecycleRunner<B: Backend + ?Sized> {
    backend: Arc<B>,
    cancel: CancellationToken,
    state: LifecycleState,
    context: LifecycleContext,
    navigated: bool,
    snapshots: watch::Sender<Snapshot>,
}

impl<B: Backend + ?Sized> LifecycleRunner<B> {
    pub fn new(backend: Arc<B>, context: LifecycleContext, cancel: CancellationToken) -> Self {
        let (snapshots, _) = watch::channel(Snapshot {
            state: LifecycleState::Setup,
            context: context.clone(),
            navigated: false,
        });
        Self {
            backend,
            cancel,
            state: LifecycleState::Setup,
            context,
            navigated: false,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &LifecycleContext {
        &self.context
    }

    pub fn navigated(&self) -> bool {
        self.navigated
    }

    /// Enters `setup` and runs until the machine waits for input.
    pub async fn start(&mut self) -> Result<LifecycleState, LifecycleError> {
        let context = mem::take(&mut self.context);
        self.settle(Transition::start(context)).await
    }

    pub async fn dispatch(
        &mut self,
        event: LifecycleEvent,
    ) -> Result<LifecycleState, LifecycleError> {
        let next = self.step(event);
        self.settle(next).await
    }

    fn step(&mut self, event: LifecycleEvent) -> Transition {
        debug!(target = "playground.lifecycle", state = %self.state, event = event.name(), "lifecycle event");
        let context = mem::take(&mut self.context);
        transition(self.state, context, event)
    }

    fn apply(&mut self, next: Transition) -> Vec<Effect> {
        if next.state != self.state {
            info!(target = "playground.lifecycle", from = %self.state, to = %next.state, "lifecycle transition");
        }
        self.state = next.state;
        self.context = next.context;
        self.snapshots.send_replace(Snapshot {
            state: self.state,
            context: self.context.clone(),
            navigated: self.navigated,
        });
        next.effects
    }

    async fn settle(&mut self, first: Transition) -> Result<LifecycleState, LifecycleError> {
        let mut queue: VecDeque<Effect> = self.apply(first).into();
        while let Some(effect) = queue.pop_front() {
            if let Some(event) = self.execute(effect).await? {
                let next = self.step(event);
                queue.extend(self.apply(next));
            }
        }
        Ok(self.state)
    }

    async fn execute(&mut self, effect: Effect) -> Result<Option<LifecycleEvent>, LifecycleError> {
        let id = self.context.user_id.clone();
        let event = match effect {
            Effect::FetchAll => {
                let backend = &self.backend;
                let fetched = cancellable(&self.cancel, async {
                    tokio::try_join!(
                        backend.get_details(),
                        backend.get_user(&id),
                        backend.list_templates(),
                        backend.get_session(&id),
                    )
                })
                .await;
                match not_cancelled(fetched)? {
                    Ok((details, user, templates, instance)) => Some(LifecycleEvent::Loaded {
                        details,
                        user,
                        templates,
                        instance,
                    }),
                    Err(err) => Some(LifecycleEvent::Failure(err.to_string())),
                }
            }
            Effect::CreateInstance { template } => {
                let conf = SessionConfiguration::for_template(template);
                let created =
                    cancellable(&self.cancel, self.backend.create_session(&id, &conf)).await;
                match not_cancelled(created)? {
                    Ok(()) => Some(LifecycleEvent::Created),
                    Err(err) => Some(LifecycleEvent::Failure(err.to_string())),
                }
            }
            Effect::DeleteInstance => {
                let deleted = cancellable(&self.cancel, self.backend.delete_session(&id)).await;
                if let Err(err) = not_cancelled(deleted)? {
                    warn!(target = "playground.lifecycle", session = %id, error = %err, "delete failed, polling for absence anyway");
                }
                None
            }
            Effect::CheckInstance { delay } => {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(LifecycleError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                let current = cancellable(&self.cancel, self.backend.get_session(&id)).await;
                match not_cancelled(current)? {
                    Ok(Some(_)) => Some(LifecycleEvent::InstancePresent),
                    Ok(None) => Some(LifecycleEvent::InstanceGone),
                    Err(err) => Some(LifecycleEvent::Failure(err.to_string())),
                }
            }
            Effect::ClearDeployParam => {
                debug!(target = "playground.lifecycle", session = %id, "deploy request consumed");
                None
            }
            Effect::Navigate => {
                self.navigated = true;
                self.snapshots.send_modify(|snapshot| snapshot.navigated = true);
                info!(target = "playground.lifecycle", session = %id, "instance created");
                None
            }
        };
        Ok(event)
    }
}

fn not_cancelled<T>(result: SdkResult<T>) -> Result<SdkResult<T>, LifecycleError> {
    match result {
        Err(SdkError::Cancelled) => Err(LifecycleError::Cancelled),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::machine::{MAX_STOP_RETRIES, STOP_TIMEOUT_REASON};
    use crate::test_support::{details, session};
    use playground_sdk::{BackendCall, InMemoryBackend};
    use test_timeout::tokio_timeout_test;

    async fn backend_with_details() -> Arc<InMemoryBackend> {
        let backend = InMemoryBackend::new();
        backend.set_details(details()).await;
        backend
    }

    #[tokio_timeout_test(10, paused)]
    async fn stop_gives_up_after_thirty_one_polls() {
        let backend = backend_with_details().await;
        backend.insert_session(session("alice")).await;
        backend
            .fail_on(BackendCall::DeleteSession("alice".into()), "delete refused")
            .await;

        let mut runner = LifecycleRunner::new(
            backend.clone(),
            LifecycleContext::new("alice", None),
            CancellationToken::new(),
        );
        assert_eq!(runner.start().await, Ok(LifecycleState::Initial));

        let started = tokio::time::Instant::now();
        let state = runner.dispatch(LifecycleEvent::Stop).await.unwrap();
        assert_eq!(state, LifecycleState::Failed);
        assert_eq!(runner.context().error.as_deref(), Some(STOP_TIMEOUT_REASON));
        assert_eq!(
            backend.count(&BackendCall::GetSession("alice".into())).await,
            1 + MAX_STOP_RETRIES as usize + 1
        );
        assert!(started.elapsed() >= std::time::Duration::from_secs(31));
    }

    #[tokio_timeout_test(10, paused)]
    async fn stop_returns_to_setup_once_gone() {
        let backend = backend_with_details().await;
        backend.insert_session(session("alice")).await;

        let mut runner = LifecycleRunner::new(
            backend.clone(),
            LifecycleContext::new("alice", None),
            CancellationToken::new(),
        );
        let mut snapshots = runner.subscribe();
        assert_eq!(runner.start().await, Ok(LifecycleState::Initial));
        assert!(runner.context().instance.is_some());
        let _ = snapshots.borrow_and_update();

        let state = runner.dispatch(LifecycleEvent::Stop).await.unwrap();
        assert_eq!(state, LifecycleState::Initial);
        assert!(runner.context().instance.is_none());
        assert!(snapshots.has_changed().unwrap());
        assert_eq!(
            backend.count(&BackendCall::DeleteSession("alice".into())).await,
            1
        );
    }

    #[tokio_timeout_test(10)]
    async fn requested_template_is_deployed() {
        let backend = backend_with_details().await;
        let mut runner = LifecycleRunner::new(
            backend.clone(),
            LifecycleContext::new("alice", Some("node".into())),
            CancellationToken::new(),
        );

        let state = runner.start().await.unwrap();
        assert_eq!(state, LifecycleState::Deploying);
        assert!(runner.navigated());
        assert!(runner.subscribe().borrow().navigated);
        assert_eq!(runner.context().template, None);
        assert_eq!(
            backend.count(&BackendCall::CreateSession("alice".into())).await,
            1
        );
    }

    #[tokio_timeout_test(10)]
    async fn deploy_failure_ends_in_failed_without_navigating() {
        let backend = backend_with_details().await;
        backend
            .fail_on(BackendCall::CreateSession("alice".into()), "quota exceeded")
            .await;
        let mut runner = LifecycleRunner::new(
            backend.clone(),
            LifecycleContext::new("alice", Some("node".into())),
            CancellationToken::new(),
        );

        assert_eq!(runner.start().await, Ok(LifecycleState::Failed));
        assert_eq!(runner.context().error.as_deref(), Some("quota exceeded"));
        assert!(!runner.navigated());
        assert!(!runner.subscribe().borrow().navigated);
        assert_eq!(
            backend.count(&BackendCall::CreateSession("alice".into())).await,
            1
        );
    }

    #[tokio_timeout_test(10)]
    async fn setup_failure_then_restart() {
        let backend = backend_with_details().await;
        backend
            .fail_on(BackendCall::ListTemplates, "catalog offline")
            .await;
        let mut runner = LifecycleRunner::new(
            backend.clone(),
            LifecycleContext::new("alice", None),
            CancellationToken::new(),
        );

        assert_eq!(runner.start().await, Ok(LifecycleState::Failed));
        assert_eq!(runner.context().error.as_deref(), Some("catalog offline"));

        backend.clear_failures().await;
        let state = runner.dispatch(LifecycleEvent::Restart).await.unwrap();
        assert_eq!(state, LifecycleState::Initial);
        assert_eq!(runner.context().error, None);
        assert!(runner.context().details.is_some());
    }

    #[tokio_timeout_test(10)]
    async fn cancelled_runner_stops() {
        let backend = backend_with_details().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut runner = LifecycleRunner::new(
            backend,
            LifecycleContext::new("alice", None),
            cancel,
        );
        assert_eq!(runner.start().await, Err(LifecycleError::Cancelled));
        assert_eq!(runner.state(), LifecycleState::Setup);
    }
}
