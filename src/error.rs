//! Custom error types for selfcall.
//!
//! This module provides structured error types for the run controller,
//! its configuration, and the command-line surface.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for selfcall operations
#[derive(Error, Debug)]
pub enum SelfCallError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // Controller Errors
    // =========================================================================
    /// Intent received while a run is in progress
    #[error("Rejected '{intent}': a run is already in progress")]
    GuardViolation { intent: String },

    /// Responder returned an error
    #[error("Responder failed: {message}")]
    Responder { message: String },

    /// Responder did not answer in time
    #[error("Responder timed out after {timeout_ms}ms")]
    ResponderTimeout { timeout_ms: u64 },

    /// No async runtime to drive the run loop on
    #[error("Cannot start run: {detail}")]
    Runtime { detail: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SelfCallError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a guard violation for the named intent
    pub fn guard(intent: impl Into<String>) -> Self {
        Self::GuardViolation {
            intent: intent.into(),
        }
    }

    /// Create a responder error
    pub fn responder(message: impl Into<String>) -> Self {
        Self::Responder {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is a benign rejection of an intent while running
    pub fn is_guard_violation(&self) -> bool {
        matches!(self, Self::GuardViolation { .. })
    }

    /// Check if this error was caused by invalid user input or configuration
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. } | Self::Config { .. })
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::GuardViolation { .. } => 2,
            Self::Responder { .. } | Self::ResponderTimeout { .. } => 3,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for selfcall results
pub type Result<T> = std::result::Result<T, SelfCallError>;

/// Extension trait for converting foreign errors to SelfCallError
pub trait IntoSelfCallError<T> {
    fn into_selfcall_responder(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoSelfCallError<T> for std::result::Result<T, E> {
    fn into_selfcall_responder(self) -> Result<T> {
        self.map_err(|e| {
            let err: anyhow::Error = e.into();
            SelfCallError::responder(format!("{err:#}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SelfCallError::invalid("max_iterations", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: max_iterations - must be at least 1"
        );

        let err = SelfCallError::ResponderTimeout { timeout_ms: 250 };
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_guard_violation() {
        let err = SelfCallError::guard("reset");
        assert!(err.is_guard_violation());
        assert!(!err.is_invalid_input());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_is_invalid_input() {
        assert!(SelfCallError::invalid("x", "y").is_invalid_input());
        assert!(SelfCallError::config("bad file").is_invalid_input());
        assert!(!SelfCallError::responder("boom").is_invalid_input());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SelfCallError::guard("start").exit_code(), 2);
        assert_eq!(SelfCallError::responder("boom").exit_code(), 3);
        assert_eq!(SelfCallError::invalid("a", "b").exit_code(), 7);
        assert_eq!(SelfCallError::config("test").exit_code(), 7);
        assert_eq!(
            SelfCallError::Runtime {
                detail: "no reactor".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/selfcall.toml");
        let err = SelfCallError::config_with_path("failed to parse", path.clone());
        if let SelfCallError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_selfcall_error_trait() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let err = result.into_selfcall_responder().unwrap_err();
        assert!(matches!(err, SelfCallError::Responder { ref message } if message == "missing"));

        let result: std::result::Result<(), anyhow::Error> = Err(anyhow::anyhow!("upstream"));
        let err = result.into_selfcall_responder().unwrap_err();
        assert!(matches!(err, SelfCallError::Responder { ref message } if message == "upstream"));
    }
}
