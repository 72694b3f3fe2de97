//! Custom assertions for domain-specific testing.
//!
//! Provides expressive assertions for run state and snapshot streams.

use crate::run::state::{Role, RunState};
use tokio::sync::mpsc::UnboundedReceiver;

/// Assert that a transcript satisfies the run state invariants.
///
/// Checks that ids follow transcript positions, the first message is the
/// user prompt, every later message is a non-empty assistant reply, and the
/// iteration counter matches the replies.
///
/// # Panics
///
/// Panics with a descriptive message on the first violated invariant.
///
/// # Example
///
/// ```rust,ignore
/// let state = controller.snapshot();
/// assert_transcript_well_formed(&state);
/// ```
pub fn assert_transcript_well_formed(state: &RunState) {
    for (position, message) in state.transcript.iter().enumerate() {
        assert_eq!(
            message.id as usize, position,
            "Message id {} does not match its position {}",
            message.id, position
        );
    }

    if let Some(first) = state.transcript.first() {
        assert_eq!(first.role, Role::User, "First message must be the user prompt");
        assert_eq!(
            first.content, state.initial_prompt,
            "First message must equal the initial prompt"
        );
    }

    for message in state.transcript.iter().skip(1) {
        assert_eq!(
            message.role,
            Role::Assistant,
            "Message {} should be an assistant reply",
            message.id
        );
        assert!(
            !message.content.trim().is_empty(),
            "Message {} has empty content",
            message.id
        );
    }

    assert!(
        state.completed_iterations <= state.max_iterations,
        "Completed {} iterations but the limit is {}",
        state.completed_iterations,
        state.max_iterations
    );
    assert_eq!(
        state.completed_iterations as usize,
        state.assistant_count(),
        "Iteration counter disagrees with assistant message count"
    );
}

/// Collect every snapshot already queued on a subscription.
pub fn drain_snapshots(rx: &mut UnboundedReceiver<RunState>) -> Vec<RunState> {
    let mut snapshots = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        snapshots.push(snapshot);
    }
    snapshots
}
