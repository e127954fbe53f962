pub mod logging {
    //! Process-wide `tracing` setup for the `playground` binary.

    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing::subscriber::SetGlobalDefaultError;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Replaces the computed filter when set to a non-empty directive string.
    pub const FILTER_ENV: &str = "PLAYGROUND_LOG_FILTER";

    /// Workspace crates raised to the requested level under `--debug`.
    const WORKSPACE_TARGETS: [&str; 4] =
        ["playground", "playground_core", "playground_sdk", "transport_bus"];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl From<LogLevel> for LevelFilter {
        fn from(level: LogLevel) -> Self {
            match level {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum LoggingError {
        #[error("cannot open log file {path:?}: {source}")]
        OpenFile {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error(transparent)]
        Install(#[from] SetGlobalDefaultError),
    }

    /// Holds the non-blocking writer open for the life of the process. Its
    /// presence also marks the subscriber as installed.
    static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    /// Installs the global subscriber. Calling it again is a no-op.
    pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
        if WRITER_GUARD.get().is_some() {
            return Ok(());
        }

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LoggingError::OpenFile {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let verbose = config.level >= LogLevel::Debug;
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter(config.level.into()))
            .with_target(verbose)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;

        let _ = WRITER_GUARD.set(guard);
        Ok(())
    }

    fn env_filter(level: LevelFilter) -> EnvFilter {
        std::env::var(FILTER_ENV)
            .ok()
            .filter(|directives| !directives.trim().is_empty())
            .map(EnvFilter::new)
            .unwrap_or_else(|| EnvFilter::new(default_filter_for(level)))
    }

    /// Below `info`, only workspace crates get chattier; dependencies such as
    /// `hyper` and `tungstenite` stay at `info`.
    pub(crate) fn default_filter_for(level: LevelFilter) -> String {
        if level < LevelFilter::DEBUG {
            return level.to_string().to_lowercase();
        }
        let crate_level = level.to_string().to_lowercase();
        WORKSPACE_TARGETS
            .iter()
            .map(|target| format!("{target}={crate_level}"))
            .fold("info".to_string(), |filter, directive| {
                format!("{filter},{directive}")
            })
    }

}
