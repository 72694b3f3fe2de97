//! Mock implementations of the responder trait.
//!
//! These mocks provide controllable test doubles for the responder
//! collaborator, enabling deterministic controller tests.

use crate::responder::Responder;
use crate::run::state::Message;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock responder with scripted replies, failures, and latency.
///
/// Replies cycle through the configured list by call number. Without a
/// list, call `n` (1-based) replies `"reply {n}"`.
///
/// # Example
///
/// ```rust,ignore
/// let responder = MockResponder::new().with_failure_on_call(2);
///
/// assert!(responder.generate_next(&transcript).await.is_ok());
/// assert!(responder.generate_next(&transcript).await.is_err());
/// assert_eq!(responder.call_count(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MockResponder {
    replies: Vec<String>,
    fail_on_call: Option<u32>,
    panic_on_call: Option<u32>,
    latency: Duration,
    call_count: AtomicU32,
    seen_lengths: Mutex<Vec<usize>>,
}

impl MockResponder {
    /// Create a new mock that always succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the replies to cycle through.
    #[must_use]
    pub fn with_replies(mut self, replies: Vec<String>) -> Self {
        self.replies = replies;
        self
    }

    /// Fail the given call (1-based).
    #[must_use]
    pub fn with_failure_on_call(mut self, call: u32) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Panic inside the given call (1-based).
    #[must_use]
    pub fn with_panic_on_call(mut self, call: u32) -> Self {
        self.panic_on_call = Some(call);
        self
    }

    /// Delay every reply by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Transcript length seen by each call, in call order.
    #[must_use]
    pub fn seen_lengths(&self) -> Vec<usize> {
        self.seen_lengths
            .lock()
            .map(|lengths| lengths.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Responder for MockResponder {
    async fn generate_next(&self, transcript: &[Message]) -> Result<String> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut lengths) = self.seen_lengths.lock() {
            lengths.push(transcript.len());
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.panic_on_call == Some(call) {
            panic!("mock panic on call {call}");
        }

        if self.fail_on_call == Some(call) {
            bail!("mock failure on call {}", call);
        }

        if self.replies.is_empty() {
            Ok(format!("reply {call}"))
        } else {
            Ok(self.replies[(call as usize - 1) % self.replies.len()].clone())
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
