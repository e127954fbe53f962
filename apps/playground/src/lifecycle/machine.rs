use std::fmt;
use std::time::Duration;

use playground_proto::{Playground, Session, Template, User};

/// Delay between two absence checks while stopping.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
/// Presence checks tolerated while stopping before giving up.
pub const MAX_STOP_RETRIES: u32 = 30;
pub const STOP_TIMEOUT_REASON: &str = "Failed to stop instance in time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Setup,
    Initial,
    Deploying,
    Stopping,
    Failed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Setup => "setup",
            LifecycleState::Initial => "initial",
            LifecycleState::Deploying => "deploying",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleContext {
    pub user_id: String,
    /// Template requested on entry; consumed once the deployment is created.
    pub template: Option<String>,
    pub instance: Option<Session>,
    pub retries: u32,
    pub error: Option<String>,
    pub user: Option<User>,
    pub templates: Vec<Template>,
    pub details: Option<Playground>,
}

impl LifecycleContext {
    pub fn new(user_id: impl Into<String>, template: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            template,
            ..Self::default()
        }
    }

    /// Fresh context keeping only what was requested on entry.
    fn reset(&self) -> Self {
        Self::new(self.user_id.clone(), self.template.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Every setup fetch completed.
    Loaded {
        details: Playground,
        user: Option<User>,
        templates: Vec<Template>,
        instance: Option<Session>,
    },
    Deploy {
        template: String,
    },
    Stop,
    Restart,
    /// The backend accepted the new instance.
    Created,
    InstancePresent,
    InstanceGone,
    Failure(String),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Loaded { .. } => "loaded",
            LifecycleEvent::Deploy { .. } => "deploy",
            LifecycleEvent::Stop => "stop",
            LifecycleEvent::Restart => "restart",
            LifecycleEvent::Created => "created",
            LifecycleEvent::InstancePresent => "instance-present",
            LifecycleEvent::InstanceGone => "instance-gone",
            LifecycleEvent::Failure(_) => "failure",
        }
    }
}

/// Side effects requested by a transition, executed by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchAll,
    CreateInstance { template: String },
    DeleteInstance,
    CheckInstance { delay: Duration },
    ClearDeployParam,
    Navigate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: LifecycleState,
    pub context: LifecycleContext,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: LifecycleState, context: LifecycleContext, effects: Vec<Effect>) -> Self {
        Self {
            state,
            context,
            effects,
        }
    }

    /// Entry point: `setup` with its fetches scheduled.
    pub fn start(context: LifecycleContext) -> Self {
        Self::to(LifecycleState::Setup, context, vec![Effect::FetchAll])
    }
}

/// Pure transition function. Events a state does not handle leave both state
/// and context untouched and request nothing.
pub fn transition(
    state: LifecycleState,
    context: LifecycleContext,
    event: LifecycleEvent,
) -> Transition {
    use LifecycleEvent as E;
    use LifecycleState as S;

    match (state, event) {
        (
            S::Setup,
            E::Loaded {
                details,
                user,
                templates,
                instance,
            },
        ) => {
            let context = LifecycleContext {
                details: Some(details),
                user,
                templates,
                instance,
                error: None,
                retries: 0,
                ..context
            };
            match (&context.instance, context.template.clone()) {
                (None, Some(template)) => Transition::to(
                    S::Deploying,
                    context,
                    vec![Effect::CreateInstance { template }],
                ),
                _ => Transition::to(S::Initial, context, Vec::new()),
            }
        }
        (S::Initial, E::Deploy { template }) => Transition::to(
            S::Deploying,
            context,
            vec![Effect::CreateInstance { template }],
        ),
        (S::Initial, E::Stop) => {
            let context = LifecycleContext {
                retries: 0,
                ..context
            };
            Transition::to(
                S::Stopping,
                context,
                vec![
                    Effect::DeleteInstance,
                    Effect::CheckInstance {
                        delay: STOP_POLL_INTERVAL,
                    },
                ],
            )
        }
        (S::Initial, E::Restart) | (S::Failed, E::Restart) => Transition::start(context.reset()),
        (S::Deploying, E::Created) => {
            let context = LifecycleContext {
                template: None,
                ..context
            };
            Transition::to(
                S::Deploying,
                context,
                vec![Effect::ClearDeployParam, Effect::Navigate],
            )
        }
        (S::Stopping, E::InstancePresent) => {
            let retries = context.retries + 1;
            if retries > MAX_STOP_RETRIES {
                let context = LifecycleContext { retries, ..context };
                transition(
                    S::Stopping,
                    context,
                    E::Failure(STOP_TIMEOUT_REASON.to_string()),
                )
            } else {
                Transition::to(
                    S::Stopping,
                    LifecycleContext { retries, ..context },
                    vec![Effect::CheckInstance {
                        delay: STOP_POLL_INTERVAL,
                    }],
                )
            }
        }
        (S::Stopping, E::InstanceGone) => Transition::start(LifecycleContext {
            instance: None,
            retries: 0,
            ..context
        }),
        (S::Setup | S::Deploying | S::Stopping, E::Failure(reason)) => Transition::to(
            S::Failed,
            LifecycleContext {
                error: Some(reason),
                ..context
            },
            Vec::new(),
        ),
        (state, _) => Transition::to(state, context, Vec::new()),
    }
}
