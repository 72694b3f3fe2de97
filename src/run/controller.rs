//! Run loop controller.
//!
//! The controller owns the single [`RunState`] of a session. Display
//! surfaces call its intents (`start`, `reset`, `set_initial_prompt`,
//! `set_max_iterations`, `cancel`) and observe it through
//! [`RunController::subscribe`].
//!
//! # Lifecycle
//!
//! ```text
//!            start (valid, idle)
//!   ┌──────┐ ──────────────────> ┌─────────┐ ──┐ iterate: responder call,
//!   │ Idle │                     │ Running │   │ append, emit, pause
//!   └──────┘ <────────────────── └─────────┘ <─┘
//!      ^  │   completed / failed / cancelled
//!      └──┘
//!     reset
//! ```
//!
//! Every transition emits one snapshot to every subscriber. Snapshots are
//! sent while the state lock is held, so subscribers see transitions in the
//! exact order they happened. Intents that arrive while running are
//! rejected with [`SelfCallError::GuardViolation`] and leave the state
//! untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use selfcall::config::ControllerConfig;
//! use selfcall::run::RunController;
//!
//! let controller = RunController::scripted(ControllerConfig::default())?;
//! let mut updates = controller.subscribe();
//! let handle = controller.start("Hello", 2)?;
//! while let Some(snapshot) = updates.recv().await {
//!     println!("{} messages", snapshot.transcript.len());
//!     if !snapshot.is_running { break; }
//! }
//! let outcome = handle.wait().await?;
//! ```

use super::state::{IterationFailure, Message, RunOutcome, RunState};
use crate::config::ControllerConfig;
use crate::error::{IntoSelfCallError, Result, SelfCallError};
use crate::responder::{Responder, ScriptedResponder};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Mutable controller internals, guarded by one lock.
struct Shared {
    state: RunState,
    subscribers: Vec<mpsc::UnboundedSender<RunState>>,
    /// Present only while a run is active
    cancel: Option<CancellationToken>,
}

impl Shared {
    /// Send the current state to every live subscriber.
    fn emit(&mut self) {
        let snapshot = self.state.clone();
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    fn reject_if_running(&self, intent: &str) -> Result<()> {
        if self.state.is_running {
            debug!("Ignoring {} while a run is in progress", intent);
            return Err(SelfCallError::guard(intent));
        }
        Ok(())
    }
}

/// Drives the self-calling loop for one session.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct RunController {
    shared: Arc<Mutex<Shared>>,
    responder: Arc<dyn Responder>,
    config: Arc<ControllerConfig>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("responder", &self.responder.name())
            .field("config", &self.config)
            .finish()
    }
}

impl RunController {
    /// Create a controller with an empty idle state.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::InvalidConfig`] if the configuration fails
    /// validation.
    pub fn new(config: ControllerConfig, responder: Arc<dyn Responder>) -> Result<Self> {
        config.validate()?;
        let state = RunState::new(config.default_prompt.clone(), config.default_max_iterations);
        Ok(Self {
            shared: Arc::new(Mutex::new(Shared {
                state,
                subscribers: Vec::new(),
                cancel: None,
            })),
            responder,
            config: Arc::new(config),
        })
    }

    /// Create a controller backed by the [`ScriptedResponder`].
    pub fn scripted(config: ControllerConfig) -> Result<Self> {
        Self::new(config, Arc::new(ScriptedResponder::new()))
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RunState {
        self.lock().state.clone()
    }

    /// Register an observer. It receives every snapshot emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RunState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Start a run with the given prompt and iteration count.
    ///
    /// The entry transition (fresh transcript holding the prompt) is applied
    /// and emitted before this returns; the iterations then proceed on a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// - [`SelfCallError::GuardViolation`] if a run is already in progress
    /// - [`SelfCallError::InvalidConfig`] if `max_iterations` is outside
    ///   `1..=max_iterations_limit`
    /// - [`SelfCallError::Runtime`] if called outside a Tokio runtime
    ///
    /// In every case the state is unchanged and nothing is emitted.
    pub fn start(&self, prompt: impl Into<String>, max_iterations: u32) -> Result<RunHandle> {
        let cancel = CancellationToken::new();
        let runtime = {
            let mut shared = self.lock();
            shared.reject_if_running("start")?;
            self.config.check_max_iterations(max_iterations)?;
            let runtime = Handle::try_current().map_err(|e| SelfCallError::Runtime {
                detail: e.to_string(),
            })?;

            shared.state.begin(prompt.into(), max_iterations);
            shared.cancel = Some(cancel.clone());
            info!(
                "Starting run with {} iteration(s) using {} responder",
                max_iterations,
                self.responder.name()
            );
            shared.emit();
            runtime
        };

        let controller = self.clone();
        let token = cancel.clone();
        let task = runtime.spawn(async move { controller.drive(token).await });
        Ok(RunHandle { task, cancel })
    }

    /// Start a run with the prompt and iteration count currently held in
    /// the state.
    ///
    /// # Errors
    ///
    /// Same as [`RunController::start`].
    pub fn start_configured(&self) -> Result<RunHandle> {
        let (prompt, max_iterations) = {
            let shared = self.lock();
            (
                shared.state.initial_prompt.clone(),
                shared.state.max_iterations,
            )
        };
        self.start(prompt, max_iterations)
    }

    /// Clear the transcript and counters.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::GuardViolation`] while a run is in progress.
    pub fn reset(&self) -> Result<()> {
        let mut shared = self.lock();
        shared.reject_if_running("reset")?;
        shared.state.clear();
        info!("Run state reset");
        shared.emit();
        Ok(())
    }

    /// Change the prompt used by the next run.
    ///
    /// # Errors
    ///
    /// Returns [`SelfCallError::GuardViolation`] while a run is in progress.
    pub fn set_initial_prompt(&self, prompt: impl Into<String>) -> Result<()> {
        let mut shared = self.lock();
        shared.reject_if_running("set_initial_prompt")?;
        shared.state.initial_prompt = prompt.into();
        shared.emit();
        Ok(())
    }

    /// Change the iteration count used by the next run.
    ///
    /// # Errors
    ///
    /// - [`SelfCallError::GuardViolation`] while a run is in progress
    /// - [`SelfCallError::InvalidConfig`] for out-of-range values
    pub fn set_max_iterations(&self, max_iterations: u32) -> Result<()> {
        let mut shared = self.lock();
        shared.reject_if_running("set_max_iterations")?;
        self.config.check_max_iterations(max_iterations)?;
        shared.state.max_iterations = max_iterations;
        shared.emit();
        Ok(())
    }

    /// Request cooperative cancellation of the active run.
    ///
    /// The loop stops at its next pause; an in-flight responder call is
    /// allowed to finish first. Returns `false` when no run is active.
    pub fn cancel(&self) -> bool {
        match &self.lock().cancel {
            Some(token) => {
                debug!("Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Iterate until the budget is used, the responder fails, or the run
    /// is cancelled.
    async fn drive(self, cancel: CancellationToken) -> RunOutcome {
        let delay = self.config.iteration_delay();

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled();
            }

            let transcript = self.lock().state.transcript.clone();
            let result = self.call_responder(&transcript).await;

            let finished = {
                let mut shared = self.lock();
                match result {
                    Ok(reply) => {
                        shared.state.append_assistant(reply);
                        debug!(
                            "Iteration {}/{} appended",
                            shared.state.completed_iterations, shared.state.max_iterations
                        );
                        if shared.state.is_running {
                            shared.emit();
                            None
                        } else {
                            shared.cancel = None;
                            info!(
                                "Run completed after {} iteration(s)",
                                shared.state.completed_iterations
                            );
                            shared.emit();
                            Some(RunOutcome::Completed)
                        }
                    }
                    Err(e) => {
                        let failure = IterationFailure {
                            iteration: shared.state.completed_iterations + 1,
                            reason: e.to_string(),
                        };
                        warn!(
                            "Iteration {} failed, stopping run: {}",
                            failure.iteration, failure.reason
                        );
                        let outcome = RunOutcome::Failed(failure);
                        shared.state.finish(outcome.clone());
                        shared.cancel = None;
                        shared.emit();
                        Some(outcome)
                    }
                }
            };
            if let Some(outcome) = finished {
                return outcome;
            }

            if cancel.is_cancelled() {
                return self.finish_cancelled();
            }
            tokio::select! {
                _ = cancel.cancelled() => return self.finish_cancelled(),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Ask the responder for the next reply, applying the configured timeout.
    ///
    /// A panic inside the responder is reported as a responder failure.
    async fn call_responder(&self, transcript: &[Message]) -> Result<String> {
        let call = AssertUnwindSafe(self.responder.generate_next(transcript)).catch_unwind();
        let caught = match self.config.responder_timeout() {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                SelfCallError::ResponderTimeout {
                    timeout_ms: self.config.responder_timeout_ms,
                }
            })?,
            None => call.await,
        };
        let reply = match caught {
            Ok(result) => result.into_selfcall_responder()?,
            Err(_) => return Err(SelfCallError::responder("responder panicked")),
        };

        if reply.trim().is_empty() {
            return Err(SelfCallError::responder("empty reply"));
        }
        Ok(reply)
    }

    fn finish_cancelled(&self) -> RunOutcome {
        let mut shared = self.lock();
        shared.state.finish(RunOutcome::Cancelled);
        shared.cancel = None;
        info!(
            "Run cancelled after {} iteration(s)",
            shared.state.completed_iterations
        );
        shared.emit();
        RunOutcome::Cancelled
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<RunOutcome>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Request cooperative cancellation of this run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end.
    ///
    /// # Errors
    ///
    /// Returns an error only if the loop task panicked or was aborted.
    pub async fn wait(self) -> Result<RunOutcome> {
        self.task
            .await
            .map_err(|e| SelfCallError::Other(anyhow::Error::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::SCRIPTED_RESPONSES;
    use crate::run::state::Role;
    use crate::testing::{assert_transcript_well_formed, drain_snapshots, MockResponder};
    use std::time::Duration;

    fn fast_config() -> ControllerConfig {
        ControllerConfig::default().with_iteration_delay_ms(0)
    }

    fn scripted() -> RunController {
        RunController::scripted(fast_config()).unwrap()
    }

    #[test]
    fn test_new_controller_is_idle_and_empty() {
        let controller = scripted();
        let state = controller.snapshot();
        assert!(!state.is_running);
        assert!(state.transcript.is_empty());
        assert_eq!(state.max_iterations, 10);
        assert_eq!(state.initial_prompt, crate::config::DEFAULT_PROMPT);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = RunController::scripted(fast_config().with_max_iterations_limit(0)).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[tokio::test]
    async fn test_completed_run_has_n_plus_one_messages() {
        for n in [1, 3, 7] {
            let controller = scripted();
            let outcome = controller.start("Hello", n).unwrap().wait().await.unwrap();
            assert_eq!(outcome, RunOutcome::Completed);

            let state = controller.snapshot();
            assert_eq!(state.transcript.len(), n as usize + 1);
            assert_eq!(state.completed_iterations, n);
            assert!(!state.is_running);
            assert_transcript_well_formed(&state);
        }
    }

    #[tokio::test]
    async fn test_end_to_end_emission_order() {
        let controller = scripted();
        let mut rx = controller.subscribe();

        controller.start("Hello", 2).unwrap().wait().await.unwrap();
        let snapshots = drain_snapshots(&mut rx);
        assert_eq!(snapshots.len(), 3);

        assert_eq!(snapshots[0].transcript.len(), 1);
        assert_eq!(snapshots[0].transcript[0].role, Role::User);
        assert_eq!(snapshots[0].transcript[0].content, "Hello");
        assert!(snapshots[0].is_running);
        assert_eq!(snapshots[0].completed_iterations, 0);

        assert_eq!(snapshots[1].transcript.len(), 2);
        assert_eq!(snapshots[1].transcript[1].content, SCRIPTED_RESPONSES[0]);
        assert!(snapshots[1].is_running);
        assert_eq!(snapshots[1].completed_iterations, 1);

        assert_eq!(snapshots[2].transcript.len(), 3);
        assert_eq!(snapshots[2].transcript[2].content, SCRIPTED_RESPONSES[1]);
        assert!(!snapshots[2].is_running);
        assert_eq!(snapshots[2].completed_iterations, 2);
        assert_eq!(snapshots[2].outcome, Some(RunOutcome::Completed));
    }

    #[tokio::test]
    async fn test_responses_cycle_modulo_ten() {
        let controller = scripted();
        controller.start("Hello", 12).unwrap().wait().await.unwrap();

        let state = controller.snapshot();
        let assistant: Vec<&str> = state
            .transcript
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(assistant.len(), 12);
        assert_eq!(assistant[10], assistant[0]);
        assert_eq!(assistant[11], assistant[1]);
    }

    #[tokio::test]
    async fn test_start_while_running_is_rejected_without_change() {
        let controller =
            RunController::scripted(ControllerConfig::default().with_iteration_delay_ms(60_000))
                .unwrap();
        let mut rx = controller.subscribe();
        let handle = controller.start("first", 5).unwrap();

        // No await between these calls, so the loop task has not run yet.
        let before = controller.snapshot();
        let err = controller.start("second", 3).unwrap_err();
        assert!(err.is_guard_violation());
        assert_eq!(controller.snapshot(), before);
        assert_eq!(drain_snapshots(&mut rx).len(), 1);

        handle.cancel();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_reset_while_running_is_rejected() {
        let controller =
            RunController::scripted(ControllerConfig::default().with_iteration_delay_ms(60_000))
                .unwrap();
        let handle = controller.start("first", 5).unwrap();

        let before = controller.snapshot();
        assert!(controller.reset().unwrap_err().is_guard_violation());
        assert!(controller
            .set_initial_prompt("other")
            .unwrap_err()
            .is_guard_violation());
        assert!(controller
            .set_max_iterations(2)
            .unwrap_err()
            .is_guard_violation());
        assert_eq!(controller.snapshot(), before);

        handle.cancel();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_while_idle_clears_transcript() {
        let controller = scripted();
        controller.start("Hello", 2).unwrap().wait().await.unwrap();

        let mut rx = controller.subscribe();
        controller.reset().unwrap();

        let state = controller.snapshot();
        assert!(state.transcript.is_empty());
        assert_eq!(state.completed_iterations, 0);
        assert!(!state.is_running);
        assert!(state.outcome.is_none());

        let snapshots = drain_snapshots(&mut rx);
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].transcript.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_max_iterations_rejected() {
        let controller = scripted();
        let mut rx = controller.subscribe();
        let before = controller.snapshot();

        for bad in [0, 51] {
            let err = controller.start("x", bad).unwrap_err();
            assert!(err.is_invalid_input());
            assert_eq!(controller.snapshot(), before);
        }
        assert!(controller.set_max_iterations(0).is_err());
        assert_eq!(controller.snapshot(), before);
        assert!(drain_snapshots(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_config_intents_feed_next_run() {
        let controller = scripted();
        let mut rx = controller.subscribe();
        controller.set_initial_prompt("Think twice").unwrap();
        controller.set_max_iterations(3).unwrap();
        assert_eq!(drain_snapshots(&mut rx).len(), 2);

        controller.start_configured().unwrap().wait().await.unwrap();
        let state = controller.snapshot();
        assert_eq!(state.transcript[0].content, "Think twice");
        assert_eq!(state.completed_iterations, 3);
    }

    #[tokio::test]
    async fn test_responder_failure_stops_run_without_dangling_message() {
        let responder = Arc::new(MockResponder::new().with_failure_on_call(2));
        let controller = RunController::new(fast_config(), responder.clone()).unwrap();
        let mut rx = controller.subscribe();

        let outcome = controller.start("Hello", 5).unwrap().wait().await.unwrap();
        match &outcome {
            RunOutcome::Failed(failure) => {
                assert_eq!(failure.iteration, 2);
                assert!(failure.reason.contains("mock failure"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }

        let state = controller.snapshot();
        assert!(!state.is_running);
        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.completed_iterations, 1);
        assert_eq!(state.outcome, Some(outcome));
        assert_transcript_well_formed(&state);
        assert_eq!(responder.call_count(), 2);

        let snapshots = drain_snapshots(&mut rx);
        assert_eq!(snapshots.len(), 3);
        assert!(!snapshots[2].is_running);
    }

    #[tokio::test]
    async fn test_empty_reply_counts_as_failure() {
        let responder = Arc::new(MockResponder::new().with_replies(vec!["   ".to_string()]));
        let controller = RunController::new(fast_config(), responder).unwrap();

        let outcome = controller.start("Hello", 2).unwrap().wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(ref f) if f.iteration == 1));
        assert_eq!(controller.snapshot().transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_responder_timeout_fails_iteration() {
        let responder = Arc::new(MockResponder::new().with_latency(Duration::from_millis(500)));
        let config = fast_config().with_responder_timeout_ms(20);
        let controller = RunController::new(config, responder).unwrap();

        let outcome = controller.start("Hello", 2).unwrap().wait().await.unwrap();
        match outcome {
            RunOutcome::Failed(failure) => {
                assert_eq!(failure.iteration, 1);
                assert!(failure.reason.contains("timed out"));
            }
            other => panic!("Expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_responder_fails_run_and_returns_to_idle() {
        let responder = Arc::new(MockResponder::new().with_panic_on_call(2));
        let controller = RunController::new(fast_config(), responder).unwrap();
        let mut rx = controller.subscribe();

        let outcome = controller.start("Hello", 3).unwrap().wait().await.unwrap();
        match &outcome {
            RunOutcome::Failed(failure) => {
                assert_eq!(failure.iteration, 2);
                assert!(failure.reason.contains("panicked"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }

        let state = controller.snapshot();
        assert!(!state.is_running);
        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.outcome, Some(outcome));
        assert_transcript_well_formed(&state);

        let last = drain_snapshots(&mut rx).pop().unwrap();
        assert!(!last.is_running);

        // The controller accepts new intents afterwards.
        controller.reset().unwrap();
        let outcome = controller.start("Again", 1).unwrap().wait().await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[test]
    fn test_start_without_runtime_leaves_state_unchanged() {
        let controller = scripted();
        let mut rx = controller.subscribe();
        let before = controller.snapshot();

        let err = controller.start("Hello", 2).unwrap_err();
        assert!(matches!(err, SelfCallError::Runtime { .. }));
        assert_eq!(controller.snapshot(), before);
        assert!(drain_snapshots(&mut rx).is_empty());
        assert!(controller.reset().is_ok());
    }

    #[tokio::test]
    async fn test_responder_receives_whole_transcript() {
        let responder = Arc::new(MockResponder::new());
        let controller = RunController::new(fast_config(), responder.clone()).unwrap();

        controller.start("Hello", 3).unwrap().wait().await.unwrap();
        assert_eq!(responder.seen_lengths(), vec![1, 2, 3]);
    }

    #[test]
    fn test_debug_does_not_take_state_lock() {
        let controller = scripted();
        let _guard = controller.lock();
        let rendered = format!("{controller:?}");
        assert!(rendered.contains("scripted"));
        assert!(rendered.contains("iteration_delay_ms"));
    }

    #[tokio::test]
    async fn test_cancel_stops_at_pause() {
        let controller =
            RunController::scripted(ControllerConfig::default().with_iteration_delay_ms(60_000))
                .unwrap();
        let mut rx = controller.subscribe();
        let handle = controller.start("Hello", 5).unwrap();

        // Wait for the first appended iteration, then cancel during the pause.
        loop {
            let snapshot = rx.recv().await.unwrap();
            if snapshot.completed_iterations == 1 {
                break;
            }
        }
        assert!(controller.cancel());

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Cancelled);
        let state = controller.snapshot();
        assert!(!state.is_running);
        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.outcome, Some(RunOutcome::Cancelled));
        assert!(!controller.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_iterations_are_paced_by_delay() {
        let controller = RunController::scripted(ControllerConfig::default()).unwrap();
        let started = tokio::time::Instant::now();

        controller.start("Hello", 3).unwrap().wait().await.unwrap();

        // Two pauses between three iterations, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(4500));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_snapshot() {
        let controller = scripted();
        let mut first = controller.subscribe();
        let mut second = controller.subscribe();
        let dropped = controller.subscribe();
        drop(dropped);

        controller.start("Hello", 4).unwrap().wait().await.unwrap();

        let a = drain_snapshots(&mut first);
        let b = drain_snapshots(&mut second);
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        let counts: Vec<u32> = a.iter().map(|s| s.completed_iterations).collect();
        assert_eq!(counts, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_restart_after_completion() {
        let controller = scripted();
        controller.start("one", 2).unwrap().wait().await.unwrap();
        controller.start("two", 1).unwrap().wait().await.unwrap();

        let state = controller.snapshot();
        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.transcript[0].content, "two");
        assert_eq!(state.transcript[1].content, SCRIPTED_RESPONSES[0]);
    }
}
