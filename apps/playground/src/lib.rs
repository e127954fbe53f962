//! Playground core: instance discovery over a pluggable bus, the session
//! lifecycle machine, and the polling loop that waits for deployments.

pub mod config;
pub mod connect;
pub mod lifecycle;
pub mod recovery;
pub mod relay;
pub mod telemetry;
pub mod terminal;

#[cfg(test)]
mod test_support;
