//! Configuration (layered: defaults < TOML file < environment).
//!
//! [`StrandConfig`] tunes the engine. [`ProviderConfig`] holds credentials
//! and endpoint overrides for the HTTP model providers.

pub mod provider;

pub use provider::ProviderConfig;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StrandError;
use crate::types::GenerationSettings;
use crate::util::retry::RetryPolicy;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "STRAND_CONFIG";

/// Engine tuning knobs shared by every conversation a runner drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    /// Maximum agent call-stack depth, counting the root conversation.
    pub max_delegation_depth: usize,
    /// Calls resolved concurrently within one model turn.
    pub max_concurrent_calls: usize,
    /// Permits in the shared worker pool (model and tool calls).
    pub worker_pool_size: usize,
    #[serde(with = "duration_ms")]
    pub model_timeout: Duration,
    /// Applied to functions registered without their own timeout.
    #[serde(with = "duration_ms")]
    pub tool_timeout: Duration,
    /// Model calls allowed for a single user turn.
    pub max_iterations: usize,
    pub retry: RetryPolicy,
    pub generation: GenerationSettings,
}

impl Default for StrandConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: 8,
            max_concurrent_calls: 16,
            worker_pool_size: 100,
            model_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(60),
            max_iterations: 25,
            retry: RetryPolicy::default(),
            generation: GenerationSettings::builder().temperature(0.0).build(),
        }
    }
}

impl StrandConfig {
    /// Load defaults, then the config file (if any), then `STRAND_*` env vars.
    ///
    /// The file is `$STRAND_CONFIG` when set, otherwise `config.toml` in the
    /// platform config directory. A missing default file is not an error.
    pub fn load() -> Result<Self, StrandError> {
        let _ = dotenvy::dotenv();
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StrandError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw).map_err(|e| {
            StrandError::InvalidConfiguration(format!("{}: {e}", path.display()))
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, StrandError> {
        toml::from_str(raw).map_err(|e| StrandError::InvalidConfiguration(e.to_string()))
    }

    /// Apply `STRAND_*` overrides read through `lookup`.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), StrandError> {
        if let Some(v) = parse_env(&lookup, "STRAND_MAX_DELEGATION_DEPTH")? {
            self.max_delegation_depth = v;
        }
        if let Some(v) = parse_env(&lookup, "STRAND_MAX_CONCURRENT_CALLS")? {
            self.max_concurrent_calls = v;
        }
        if let Some(v) = parse_env(&lookup, "STRAND_WORKER_POOL_SIZE")? {
            self.worker_pool_size = v;
        }
        if let Some(v) = parse_env(&lookup, "STRAND_MAX_ITERATIONS")? {
            self.max_iterations = v;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "STRAND_MODEL_TIMEOUT_MS")? {
            self.model_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "STRAND_TOOL_TIMEOUT_MS")? {
            self.tool_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_env(&lookup, "STRAND_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        let checks = [
            (self.max_delegation_depth, "max_delegation_depth"),
            (self.max_concurrent_calls, "max_concurrent_calls"),
            (self.worker_pool_size, "worker_pool_size"),
            (self.max_iterations, "max_iterations"),
            (self.retry.max_attempts as usize, "retry.max_attempts"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(StrandError::InvalidConfiguration(format!(
                    "{name} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, StrandError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            StrandError::InvalidConfiguration(format!("{key}: cannot parse '{raw}'"))
        }),
    }
}

/// `config.toml` under the platform config directory for strand.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "strand")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
