//! Bounded polling that follows a session or workspace until it is reachable,
//! with explicit resolution when a deployment already exists.

mod probe;
mod target;
mod watcher;

pub use probe::{HttpProbe, Probe, DEFAULT_PROBE_TIMEOUT};
pub use target::{SessionTarget, Tracked, WorkspaceTarget};
pub use watcher::{Conflict, DeployOutcome, Endpoint, RecoveryError, RecoveryLoop, RetryPolicy};
