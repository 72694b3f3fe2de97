//! Configuration management for the run controller.
//!
//! Configuration is read from an optional TOML file. Every field has a
//! default, so a missing file (or a partial one) is valid.
//!
//! # Example selfcall.toml
//!
//! ```toml
//! iteration_delay_ms = 500
//! max_iterations_limit = 50
//! default_max_iterations = 10
//! responder_timeout_ms = 30000
//! ```

use crate::error::{Result, SelfCallError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config filename, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "selfcall.toml";

/// Prompt used when the user does not supply one.
pub const DEFAULT_PROMPT: &str = "You are a self-reflective AI. Think about what you just said and respond with a new thought or question.";

fn default_iteration_delay_ms() -> u64 {
    1500
}

fn default_max_iterations_limit() -> u32 {
    50
}

fn default_max_iterations() -> u32 {
    10
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_responder_timeout_ms() -> u64 {
    30_000
}

/// Settings for a [`RunController`](crate::run::RunController).
///
/// # Example
///
/// ```
/// use selfcall::config::ControllerConfig;
///
/// let config = ControllerConfig::default().with_iteration_delay_ms(0);
/// assert_eq!(config.iteration_delay_ms, 0);
/// assert_eq!(config.max_iterations_limit, 50);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Pause between iterations in milliseconds.
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,

    /// Largest accepted `max_iterations` for a run.
    #[serde(default = "default_max_iterations_limit")]
    pub max_iterations_limit: u32,

    /// `max_iterations` of a fresh controller.
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    /// Initial prompt of a fresh controller.
    #[serde(default = "default_prompt")]
    pub default_prompt: String,

    /// Responder call timeout in milliseconds (0 disables the timeout).
    #[serde(default = "default_responder_timeout_ms")]
    pub responder_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            iteration_delay_ms: default_iteration_delay_ms(),
            max_iterations_limit: default_max_iterations_limit(),
            default_max_iterations: default_max_iterations(),
            default_prompt: default_prompt(),
            responder_timeout_ms: default_responder_timeout_ms(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            SelfCallError::config_with_path(format!("cannot read: {e}"), path.to_path_buf())
        })?;
        let config: ControllerConfig = toml::from_str(&content).map_err(|e| {
            SelfCallError::config_with_path(format!("cannot parse: {e}"), path.to_path_buf())
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SelfCallError::config(e.to_string()))
    }

    /// Check the configuration for values the controller cannot honour.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations_limit == 0 {
            return Err(SelfCallError::invalid(
                "max_iterations_limit",
                "must be at least 1",
            ));
        }
        self.check_max_iterations(self.default_max_iterations)
            .map_err(|_| {
                SelfCallError::invalid(
                    "default_max_iterations",
                    format!("must be between 1 and {}", self.max_iterations_limit),
                )
            })
    }

    /// Check a requested iteration count against `[1, max_iterations_limit]`.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::InvalidConfig`] for out-of-range values.
    pub fn check_max_iterations(&self, value: u32) -> Result<()> {
        if value < 1 || value > self.max_iterations_limit {
            return Err(SelfCallError::invalid(
                "max_iterations",
                format!(
                    "{value} is outside the allowed range 1..={}",
                    self.max_iterations_limit
                ),
            ));
        }
        Ok(())
    }

    /// Pause between iterations.
    #[must_use]
    pub fn iteration_delay(&self) -> Duration {
        Duration::from_millis(self.iteration_delay_ms)
    }

    /// Responder timeout, or `None` when disabled.
    #[must_use]
    pub fn responder_timeout(&self) -> Option<Duration> {
        (self.responder_timeout_ms > 0).then(|| Duration::from_millis(self.responder_timeout_ms))
    }

    #[must_use]
    pub fn with_iteration_delay_ms(mut self, ms: u64) -> Self {
        self.iteration_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_max_iterations_limit(mut self, limit: u32) -> Self {
        self.max_iterations_limit = limit;
        self
    }

    #[must_use]
    pub fn with_default_max_iterations(mut self, n: u32) -> Self {
        self.default_max_iterations = n;
        self
    }

    #[must_use]
    pub fn with_default_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_responder_timeout_ms(mut self, ms: u64) -> Self {
        self.responder_timeout_ms = ms;
        self
    }
}
