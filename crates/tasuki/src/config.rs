//! Runtime configuration read from the environment.

use crate::executor::ContainerRuntime;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;
use tasuki_core::ActivityError;

/// Base URL of the instruction store. Required.
pub const INSTRUCTION_STORE_URL: &str = "TASUKI_INSTRUCTION_STORE_URL";
/// Bearer token for the instruction store and agent registry.
pub const API_KEY: &str = "TASUKI_API_KEY";
/// Base URL of an HTTP agent registry for packaged agents.
pub const AGENT_REGISTRY_URL: &str = "TASUKI_AGENT_REGISTRY_URL";
/// Existing directory for staged instruction files.
pub const STAGING_DIR: &str = "TASUKI_STAGING_DIR";
/// `docker` (default), `local`, or another docker-compatible program.
pub const CONTAINER_RUNTIME: &str = "TASUKI_CONTAINER_RUNTIME";
/// Default agent deadline in whole seconds.
pub const AGENT_TIMEOUT_SECS: &str = "TASUKI_AGENT_TIMEOUT_SECS";
/// Cancellation grace period in milliseconds.
pub const GRACE_PERIOD_MS: &str = "TASUKI_GRACE_PERIOD_MS";

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Validated settings for an [`AgentRuntime`](crate::runtime::AgentRuntime).
#[derive(Debug, Clone)]
pub struct Config {
    /// Where named instructions are fetched from.
    pub instruction_store_url: Url,
    /// Bearer token sent to the store and the registry.
    pub api_key: Option<String>,
    /// HTTP registry for packaged agents, if any.
    pub agent_registry_url: Option<Url>,
    /// Where instruction files are staged. Defaults to the system temp dir.
    pub staging_dir: PathBuf,
    /// How containerized agents are launched.
    pub container_runtime: ContainerRuntime,
    /// Default deadline for agent invocations without their own timeout.
    pub agent_timeout: Option<Duration>,
    /// How long a cancelled agent may take to exit.
    pub grace_period: Duration,
}

impl Config {
    /// Reads and validates the process environment.
    ///
    /// # Errors
    ///
    /// [`ActivityError::Configuration`] naming the first missing or invalid key.
    pub fn from_env() -> Result<Self, ActivityError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads and validates settings through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ActivityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let instruction_store_url = get(INSTRUCTION_STORE_URL)
            .ok_or_else(|| missing(INSTRUCTION_STORE_URL))
            .and_then(|value| parse_url(INSTRUCTION_STORE_URL, &value))?;

        let agent_registry_url = get(AGENT_REGISTRY_URL)
            .map(|value| parse_url(AGENT_REGISTRY_URL, &value))
            .transpose()?;

        let staging_dir = get(STAGING_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        if !staging_dir.is_dir() {
            return Err(ActivityError::Configuration(format!(
                "{STAGING_DIR} is not a directory: {}",
                staging_dir.display()
            )));
        }

        let agent_timeout = get(AGENT_TIMEOUT_SECS)
            .map(|value| parse_number(AGENT_TIMEOUT_SECS, &value).map(Duration::from_secs))
            .transpose()?;

        let grace_period = get(GRACE_PERIOD_MS)
            .map(|value| parse_number(GRACE_PERIOD_MS, &value).map(Duration::from_millis))
            .transpose()?
            .unwrap_or(DEFAULT_GRACE_PERIOD);

        Ok(Self {
            instruction_store_url,
            api_key: get(API_KEY),
            agent_registry_url,
            staging_dir,
            container_runtime: get(CONTAINER_RUNTIME)
                .map(|value| ContainerRuntime::parse(&value))
                .unwrap_or_default(),
            agent_timeout,
            grace_period,
        })
    }
}

/// Reads a required, non-blank environment variable.
///
/// Flows use this for their own secrets, such as model API keys.
pub fn require_env(key: &str) -> Result<String, ActivityError> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| missing(key))
}

fn missing(key: &str) -> ActivityError {
    ActivityError::Configuration(format!("{key} is not set"))
}

fn parse_url(key: &str, value: &str) -> Result<Url, ActivityError> {
    let url = Url::parse(value.trim())
        .map_err(|err| ActivityError::Configuration(format!("{key} is not a valid URL: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(ActivityError::Configuration(format!(
            "{key} must be an http(s) base URL"
        )));
    }
    Ok(url)
}

fn parse_number(key: &str, value: &str) -> Result<u64, ActivityError> {
    value.trim().parse().map_err(|_| {
        ActivityError::Configuration(format!("{key} must be a whole number, got '{value}'"))
    })
}
