//! Testing infrastructure for selfcall.
//!
//! This module provides a controllable responder double and domain
//! assertions for exercising the run controller without real models.
//!
//! # Example
//!
//! ```rust,ignore
//! use selfcall::testing::{MockResponder, assert_transcript_well_formed};
//!
//! let responder = MockResponder::new()
//!     .with_failure_on_call(3)
//!     .with_latency(Duration::from_millis(10));
//! ```

pub mod assertions;
pub mod mocks;

// Re-export commonly used types
pub use assertions::*;
pub use mocks::*;
