//! Run loop module.
//!
//! This module contains the self-calling loop:
//!
//! - [`controller`] - Run controller that owns the state and drives iterations
//! - [`state`] - Transcript and run state types
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ intents ┌───────────────┐ transcript ┌───────────┐
//! │ Display      │───────> │ RunController │──────────> │ Responder │
//! │ surface      │ <───────│   RunState    │ <──────────│           │
//! └──────────────┘snapshots└───────────────┘   reply    └───────────┘
//! ```

pub mod controller;
pub mod state;

// Re-exports for convenience
pub use controller::{RunController, RunHandle};
pub use state::{IterationFailure, Message, Role, RunOutcome, RunState};
