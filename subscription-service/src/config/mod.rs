//! Configuration module for subscription-service.

use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub heartbeat: HeartbeatConfig,
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval: Duration,
}

/// Limits applied to every repository and billing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollaboratorConfig {
    /// `None` lets a call run until its backend answers.
    pub timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "subscription-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat: HeartbeatConfig::default(),
            collaborators: CollaboratorConfig::default(),
        }
    }
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let interval_secs =
            parse_var::<u64>("HEARTBEAT_INTERVAL_SECS")?.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "subscription-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            heartbeat: HeartbeatConfig {
                enabled: parse_var("HEARTBEAT_ENABLED")?.unwrap_or(true),
                interval: Duration::from_secs(interval_secs),
            },
            collaborators: CollaboratorConfig {
                timeout: parse_var::<u64>("COLLABORATOR_TIMEOUT_MS")?
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis),
            },
        })
    }
}

/// Read and parse an optional variable. Present but malformed is an error
/// rather than a silent fallback to the default.
fn parse_var<T>(name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e))
        }),
        Err(_) => Ok(None),
    }
}
