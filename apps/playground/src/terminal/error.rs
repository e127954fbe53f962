use std::io;

use playground_sdk::{SdkError, UnknownEnvironment};
use thiserror::Error;
use transport_bus::BusError;

use crate::connect::ChannelError;
use crate::lifecycle::LifecycleError;
use crate::recovery::RecoveryError;
use crate::telemetry::logging::LoggingError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Environment(#[from] UnknownEnvironment),
    #[error("{0}")]
    Backend(#[from] SdkError),
    #[error("{0}")]
    Recovery(#[from] RecoveryError),
    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to stop {id}: {reason}")]
    Stop { id: String, reason: String },
    #[error("{kind} {id} already exists ({phase}); pass --replace to replace it")]
    Conflict {
        kind: &'static str,
        id: String,
        phase: &'static str,
    },
    #[error("relay error: {0}")]
    Bus(#[from] BusError),
    #[error("instance request failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] LoggingError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
