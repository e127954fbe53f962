use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Deployment a client talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Dev,
    Local,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
            Environment::Local => "local",
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Production => "https://playground.substrate.dev/api",
            Environment::Staging => "https://playground-staging.substrate.dev/api",
            Environment::Dev => "http://playground-dev.substrate.test/api",
            Environment::Local => "http://playground.substrate.test/api",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown environment '{0}' (expected production, staging, dev or local)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            "dev" | "development" => Ok(Environment::Dev),
            "local" => Ok(Environment::Local),
            _ => Err(UnknownEnvironment(value.to_string())),
        }
    }
}

/// Base URL for API calls. An explicit override wins over the environment
/// default; trailing slashes are stripped so paths can be appended verbatim.
pub fn resolve_base_url(env: Environment, override_url: Option<&str>) -> String {
    let raw = override_url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| env.base_url());
    raw.trim_end_matches('/').to_string()
}
