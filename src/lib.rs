//! selfcall - a self-calling agent loop
//!
//! A run controller that repeatedly hands its own transcript to a
//! responder, appends the reply, and paces the next iteration, while
//! streaming every state change to observers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`] - Controller configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`responder`] - Responder abstraction and the scripted reference responder
//! - [`run`] - Run state machine and controller
//! - [`testing`] - Testing infrastructure (mocks, assertions)
//!
//! # Example
//!
//! ```rust,ignore
//! use selfcall::config::ControllerConfig;
//! use selfcall::run::RunController;
//!
//! let controller = RunController::scripted(ControllerConfig::default())?;
//! let mut updates = controller.subscribe();
//! let outcome = controller.start("Hello", 3)?.wait().await?;
//! ```

pub mod config;
pub mod error;
pub mod responder;
pub mod run;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoSelfCallError, Result, SelfCallError};

pub use config::{ControllerConfig, DEFAULT_CONFIG_FILE, DEFAULT_PROMPT};
pub use responder::{Responder, ScriptedResponder, SCRIPTED_RESPONSES};
pub use run::{IterationFailure, Message, Role, RunController, RunHandle, RunOutcome, RunState};
pub use testing::{assert_transcript_well_formed, drain_snapshots, MockResponder};
