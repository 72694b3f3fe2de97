//! Run state types and transitions.
//!
//! This module defines the transcript and run bookkeeping owned by the
//! controller. Snapshots of [`RunState`] are what observers receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a transcript message.
///
/// # Example
///
/// ```
/// use selfcall::run::state::Role;
///
/// assert_eq!(Role::Assistant.to_string(), "assistant");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The initial prompt
    User,
    /// A responder reply
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single transcript entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the transcript, starting at 0
    pub id: u32,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(id: u32, role: Role, content: String) -> Self {
        Self {
            id,
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// An iteration whose responder call did not produce a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationFailure {
    /// 1-based number of the iteration that failed
    pub iteration: u32,
    pub reason: String,
}

/// How the most recent run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    /// All configured iterations were appended
    Completed,
    /// Stopped by a cancellation request
    Cancelled,
    /// Stopped by a responder failure or timeout
    Failed(IterationFailure),
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed(failure) => write!(
                f,
                "failed at iteration {}: {}",
                failure.iteration, failure.reason
            ),
        }
    }
}

/// State of the run loop.
///
/// # Example
///
/// ```
/// use selfcall::run::state::RunState;
///
/// let state = RunState::new("Hello", 3);
/// assert!(state.transcript.is_empty());
/// assert!(!state.is_running);
/// assert_eq!(state.max_iterations, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub transcript: Vec<Message>,
    pub is_running: bool,
    pub completed_iterations: u32,
    pub max_iterations: u32,
    pub initial_prompt: String,
    /// Set when a run ends; cleared by the next start or a reset
    pub outcome: Option<RunOutcome>,
}

impl RunState {
    /// Create an empty idle state.
    #[must_use]
    pub fn new(initial_prompt: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            transcript: Vec::new(),
            is_running: false,
            completed_iterations: 0,
            max_iterations,
            initial_prompt: initial_prompt.into(),
            outcome: None,
        }
    }

    /// Enter the running state with a fresh transcript holding the prompt.
    pub fn begin(&mut self, prompt: String, max_iterations: u32) {
        self.transcript.clear();
        self.transcript.push(Message::new(0, Role::User, prompt.clone()));
        self.initial_prompt = prompt;
        self.max_iterations = max_iterations;
        self.completed_iterations = 0;
        self.outcome = None;
        self.is_running = true;
    }

    /// Append a responder reply and count the iteration.
    ///
    /// Finishes the run with [`RunOutcome::Completed`] when the iteration
    /// budget is reached.
    pub fn append_assistant(&mut self, content: String) {
        let id = self.transcript.len() as u32;
        self.transcript.push(Message::new(id, Role::Assistant, content));
        self.completed_iterations += 1;
        if self.is_complete() {
            self.finish(RunOutcome::Completed);
        }
    }

    /// Leave the running state, keeping the transcript.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.is_running = false;
        self.outcome = Some(outcome);
    }

    /// Clear the transcript and counters. Prompt and limit are kept.
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.completed_iterations = 0;
        self.is_running = false;
        self.outcome = None;
    }

    /// Whether the iteration budget has been used up.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_iterations >= self.max_iterations
    }

    /// Number of assistant messages in the transcript.
    #[must_use]
    pub fn assistant_count(&self) -> usize {
        self.transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }
}
