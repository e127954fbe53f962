//! Session lifecycle: a pure state machine and the runner that executes its
//! effects against the backend.

mod machine;
mod runner;

pub use machine::{
    transition, Effect, LifecycleContext, LifecycleEvent, LifecycleState, Transition,
    MAX_STOP_RETRIES, STOP_POLL_INTERVAL, STOP_TIMEOUT_REASON,
};
pub use runner::{LifecycleError, LifecycleRunner, Snapshot};
