//! Election configuration
//!
//! Sources are merged in precedence order (later sources override earlier ones):
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `LEADER_ELECTION_`, using `__` to
//!    reach nested keys (`LEADER_ELECTION_RETRY__MAX_RETRIES=5`)

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordination::is_valid_path;
use crate::error::ConfigError;
use crate::retry::RetryConfig;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "LEADER_ELECTION_";

/// Settings for one candidate's participation in an election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Persistent node that holds every candidate
    pub root_path: String,
    /// Name prefix of candidate nodes; the service appends the sequence number
    pub candidate_prefix: String,
    /// Session timeout requested from the coordination service, in milliseconds
    pub session_timeout_ms: u64,
    /// Listings tried when the predecessor vanishes before its watch is armed
    pub max_rearm_attempts: u32,
    /// Failed rejoins tolerated before giving up; `None` retries forever
    pub max_rejoin_attempts: Option<u32>,
    /// Backoff for transient coordination failures
    pub retry: RetryConfig,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            root_path: "/leader-election".to_string(),
            candidate_prefix: "candidate_".to_string(),
            session_timeout_ms: 3000,
            max_rearm_attempts: 3,
            max_rejoin_attempts: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ElectionConfig {
    /// Build the layered figment without extracting it.
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(ElectionConfig::default()));
        if let Some(path) = file {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration.
    ///
    /// An explicitly named file must exist.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            debug!(path = %path.display(), "loading election configuration file");
        }

        let config: Self = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the election cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root_path == "/" || !is_valid_path(&self.root_path) {
            return Err(ConfigError::invalid(
                "root_path",
                format!(
                    "'{}' must be an absolute path below '/' without a trailing slash",
                    self.root_path
                ),
            ));
        }
        if self.candidate_prefix.is_empty() || self.candidate_prefix.contains('/') {
            return Err(ConfigError::invalid(
                "candidate_prefix",
                "must be non-empty and must not contain '/'",
            ));
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::invalid("session_timeout_ms", "must be positive"));
        }
        if self.max_rearm_attempts == 0 {
            return Err(ConfigError::invalid("max_rearm_attempts", "must be at least 1"));
        }
        if self.max_rejoin_attempts == Some(0) {
            return Err(ConfigError::invalid(
                "max_rejoin_attempts",
                "must be at least 1 when set",
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        Ok(())
    }

    /// Session timeout as a [`Duration`].
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}
