use std::time::Duration;

use playground_sdk::{resolve_base_url, Environment, UnknownEnvironment, DEFAULT_REQUEST_TIMEOUT};
use serde::Deserialize;

use crate::connect::DEFAULT_TIMEOUT;

/// Settings read from `PLAYGROUND__*` environment variables (after `.env` is
/// loaded). CLI flags override them.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub channel_timeout_ms: Option<u64>,
    #[serde(default)]
    pub log_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_source(config::Environment::with_prefix("PLAYGROUND").separator("__"))
    }

    fn from_source(source: config::Environment) -> Self {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_default()
    }

    fn normalize(mut self) -> Self {
        self.env = Self::normalize_opt(self.env.take());
        self.base_url = Self::normalize_opt(self.base_url.take());
        self.relay_url = Self::normalize_opt(self.relay_url.take());
        self.log_path = Self::normalize_opt(self.log_path.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn environment(&self) -> Result<Environment, UnknownEnvironment> {
        match &self.env {
            Some(env) => env.parse(),
            None => Ok(Environment::default()),
        }
    }

    pub fn api_url(&self, env: Environment) -> String {
        resolve_base_url(env, self.base_url.as_deref())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn channel_timeout(&self) -> Duration {
        self.channel_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}
