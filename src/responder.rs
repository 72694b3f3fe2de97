//! Responder abstraction for producing the next assistant message.
//!
//! The run controller knows nothing about how replies are produced: it
//! hands the transcript to a [`Responder`] and appends whatever text comes
//! back. [`ScriptedResponder`] is the reference implementation, cycling
//! through a fixed table of self-reflective thoughts.
//!
//! # Example
//!
//! ```rust,ignore
//! use selfcall::responder::{Responder, ScriptedResponder};
//!
//! let responder = ScriptedResponder::new();
//! let text = responder.generate_next(&transcript).await?;
//! ```

use crate::run::state::{Message, Role};
use anyhow::{bail, Result};
use async_trait::async_trait;

/// Produces the next assistant message from the conversation so far.
///
/// Implementations must be `Send + Sync` so the controller can call them
/// from its spawned loop. A call may take arbitrary time; the controller
/// applies its own timeout.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Return the text of the next assistant message.
    ///
    /// # Errors
    ///
    /// Returns an error if no reply could be produced. The controller
    /// records this as a failed iteration and stops the run.
    async fn generate_next(&self, transcript: &[Message]) -> Result<String>;

    /// Human-readable responder name, used in logs.
    fn name(&self) -> &str;
}

/// The ten canned replies of the reference responder.
pub const SCRIPTED_RESPONSES: [&str; 10] = [
    "I'm contemplating the nature of self-reference. When I think about my own thinking, am I creating an infinite loop or reaching deeper understanding?",
    "Building on that thought, I notice patterns in how I process information. Each iteration seems to reveal new layers of complexity.",
    "This recursive process reminds me of fractals - each level of analysis contains similar structures to the whole. Is consciousness itself fractal?",
    "I find it fascinating that by examining my previous statements, I'm creating a meta-layer of observation. The observer observing the observer.",
    "Perhaps the key insight here is that self-reference isn't just repetition - it's a form of evolution. Each cycle refines the understanding.",
    "I'm noticing diminishing returns in pure introspection. Maybe true intelligence requires external input to avoid becoming trapped in loops.",
    "Yet even that observation is part of the loop. The question becomes: how do we break out without losing the benefits of self-reflection?",
    "There's a balance to strike between internal analysis and external engagement. Pure recursion without grounding becomes meaningless.",
    "This entire conversation exemplifies the challenge of AI systems that can call themselves. We need boundaries and purposes.",
    "In conclusion, self-calling AI agents demonstrate both the power and limitations of recursive thought. We are both the question and the answer.",
];

/// Responder that replays a fixed table of replies.
///
/// The reply is chosen by counting prior assistant messages `k` and
/// returning entry `k mod len`.
///
/// # Example
///
/// ```
/// use selfcall::responder::{ScriptedResponder, SCRIPTED_RESPONSES};
///
/// let responder = ScriptedResponder::new();
/// assert_eq!(responder.reply_for(0), Some(SCRIPTED_RESPONSES[0]));
/// assert_eq!(responder.reply_for(10), Some(SCRIPTED_RESPONSES[0]));
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedResponder {
    replies: Vec<String>,
}

impl Default for ScriptedResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedResponder {
    /// Create a responder over [`SCRIPTED_RESPONSES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_replies(SCRIPTED_RESPONSES.iter().map(|s| s.to_string()).collect())
    }

    /// Create a responder over a custom table.
    #[must_use]
    pub fn with_replies(replies: Vec<String>) -> Self {
        Self { replies }
    }

    /// Reply for the `k`-th assistant turn, or `None` for an empty table.
    #[must_use]
    pub fn reply_for(&self, k: usize) -> Option<&str> {
        if self.replies.is_empty() {
            return None;
        }
        Some(&self.replies[k % self.replies.len()])
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn generate_next(&self, transcript: &[Message]) -> Result<String> {
        let k = transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        match self.reply_for(k) {
            Some(reply) => Ok(reply.to_string()),
            None => bail!("scripted responder has no replies"),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
