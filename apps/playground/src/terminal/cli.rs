use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "playground",
    about = "Deploy and follow playground sessions and workspaces",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        short = 'e',
        global = true,
        env = "PLAYGROUND_ENV",
        help = "Backend environment (production, staging, dev, local)"
    )]
    pub env: Option<String>,

    #[arg(
        long = "base-url",
        global = true,
        value_name = "URL",
        help = "Override the backend API base URL"
    )]
    pub base_url: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long,
        short = 'd',
        global = true,
        help = "Shorthand for --log-level debug"
    )]
    pub debug: bool,

    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "PLAYGROUND_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "PLAYGROUND_LOG_FILE",
        help = "Write logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    /// `fallback_file` applies when no file was given on the command line.
    pub fn to_config(&self, fallback_file: Option<PathBuf>) -> LogConfig {
        let level = if self.debug {
            self.level.max(LogLevel::Debug)
        } else {
            self.level
        };
        LogConfig {
            level,
            file: self.file.clone().or(fallback_file),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a session from a template and wait until it is reachable
    Deploy(DeployArgs),
    /// Wait for an existing session to become reachable
    Watch(TargetArgs),
    /// Delete a session and wait until it is gone
    Stop(TargetArgs),
    /// Manage workspaces
    #[command(subcommand)]
    Workspace(WorkspaceCommand),
    /// List the instances announcing themselves through a relay
    Discover(DiscoverArgs),
    /// Run a relay hub for cross-process discovery
    Relay(RelayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Session identifier (the owning user id)
    pub session: String,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Session identifier (the owning user id)
    pub session: String,

    #[arg(long, short = 't', help = "Template to deploy")]
    pub template: String,

    #[arg(long, help = "Session duration in minutes")]
    pub duration: Option<u32>,

    #[arg(long, help = "Replace an existing session instead of failing")]
    pub replace: bool,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// Create a workspace from a repository and wait until it is reachable
    Deploy(WorkspaceDeployArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WorkspaceDeployArgs {
    /// Workspace identifier (the owning user id)
    pub workspace: String,

    #[arg(long, short = 'r', help = "Repository to check out")]
    pub repository: String,

    #[arg(long, default_value = "master", help = "Git reference to check out")]
    pub reference: String,

    #[arg(long, help = "Replace an existing workspace instead of failing")]
    pub replace: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DiscoverArgs {
    #[arg(
        long,
        env = "PLAYGROUND_RELAY_URL",
        value_name = "URL",
        help = "WebSocket URL of the relay hub (ws://host:port/ws)"
    )]
    pub relay: Option<String>,

    #[arg(
        long = "wait-ms",
        default_value_t = 1_000,
        help = "How long to collect announcements"
    )]
    pub wait_ms: u64,

    #[arg(long, help = "Ask every instance for its actions")]
    pub actions: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    #[arg(long, short = 'p', default_value_t = 9_100, help = "Port to listen on")]
    pub port: u16,

    #[arg(long, default_value = "127.0.0.1", help = "Address to bind")]
    pub host: String,
}
