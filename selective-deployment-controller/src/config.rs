use std::{env::var, str::FromStr, time::Duration};

use thiserror::Error;

const NAMESPACE_ENV: &str = "SD_CONTROLLER_NAMESPACE";
const SYNC_TIMEOUT_ENV: &str = "SD_CONTROLLER_SYNC_TIMEOUT_SECS";
const MAX_RETRIES_ENV: &str = "SD_CONTROLLER_MAX_RETRIES";
const RETRY_BASE_ENV: &str = "SD_CONTROLLER_RETRY_BASE_MILLIS";
const RETRY_MAX_ENV: &str = "SD_CONTROLLER_RETRY_MAX_SECS";

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_MILLIS: u64 = 5;
const DEFAULT_RETRY_MAX_SECS: u64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// namespace the selective deployments and workloads are watched in, all when unset
    pub namespace: Option<String>,
    pub sync_timeout: Duration,
    /// lookup retries before a queued key is dropped
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("'{}' has an invalid value: '{}'", .0, .1)]
    InvalidValue(&'static str, String),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            sync_timeout: Duration::from_secs(DEFAULT_SYNC_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MILLIS),
            retry_max_delay: Duration::from_secs(DEFAULT_RETRY_MAX_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            namespace: lookup(NAMESPACE_ENV).filter(|namespace| !namespace.is_empty()),
            sync_timeout: Duration::from_secs(parse_or(
                &lookup,
                SYNC_TIMEOUT_ENV,
                DEFAULT_SYNC_TIMEOUT_SECS,
            )?),
            max_retries: parse_or(&lookup, MAX_RETRIES_ENV, DEFAULT_MAX_RETRIES)?,
            retry_base_delay: Duration::from_millis(parse_or(
                &lookup,
                RETRY_BASE_ENV,
                DEFAULT_RETRY_BASE_MILLIS,
            )?),
            retry_max_delay: Duration::from_secs(parse_or(
                &lookup,
                RETRY_MAX_ENV,
                DEFAULT_RETRY_MAX_SECS,
            )?),
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, value)),
        None => Ok(default),
    }
}
