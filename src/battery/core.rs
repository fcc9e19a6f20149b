//! Shared test-session lifecycle skeleton.
//!
//! Every test runs on the same [`Controller`]:
//!
//! ```text
//! Instructions -> Presenting(i) -> AwaitingResponse(i) -> evaluate
//!     -> { next | delay-then-next | confirm-then-next | Finishing }
//! ```
//!
//! with `Interrupted` reachable from any state. The controller owns all
//! deferred timers for its run; every transition bumps an `epoch` counter and
//! cancels outstanding timers, and every timer callback re-checks the epoch
//! before acting. A callback whose epoch no longer matches is stale and must
//! not touch session state or the transport.
//!
//! Finishing is idempotent and performs persist, cleanup and notification as
//! independent best-effort steps: a sink failure is reported in the summary,
//! never allowed to skip cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::StimulusResult;
use crate::session::{ActivePhase, ChatId, PhaseState, Profile, Session, SessionStore};
use crate::stimulus::{Stimulus, StimulusProvider};
use crate::storage::{ResultSink, TestMetrics};
use crate::transport::{ChatTransport, MessageId, OutboundMessage};

use super::TestKind;

/// Button payloads understood by the shared lifecycle.
pub const KEY_BEGIN: &str = "begin";
pub const KEY_STOP: &str = "stop";
pub const KEY_RETRY: &str = "retry";
pub const KEY_PRESS: &str = "press";

/// A qualifying user response routed into the active controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseInput {
    /// Inline button payload.
    Key(String),
    /// Free-text message.
    Text(String),
}

/// Outcome record for one fully evaluated iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub correct: bool,
    pub latency_ms: u64,
    pub response: String,
    pub expected: String,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Natural end, including "ran out of attempts at the stop rule".
    Completed,
    /// Natural end where the test's goal was not met (reaction exhaustion).
    Failed,
    /// Explicit stop or unrecoverable error.
    Interrupted,
}

/// What `evaluate` concluded about an inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Append a record and consult the continuation policy.
    Scored(IterationRecord),
    /// Replace the most recent record (a re-attempt of the same challenge)
    /// and consult the continuation policy.
    Rescored(IterationRecord),
    /// Absorbed into working state (fluency words); stay in
    /// `AwaitingResponse`.
    Accumulated,
    /// Not a qualifying response; ignore.
    Ignored,
}

/// How the lifecycle proceeds after an evaluated iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Present the next iteration immediately.
    Next,
    /// Short feedback pause, then present the next iteration.
    NextAfter(Duration),
    /// Ask the user to confirm before the next attempt.
    ConfirmThenNext(String),
    /// Terminal outcome reached.
    Finish(RunStatus),
}

/// Wait policy while a response is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// No per-iteration timeout; bounded only by platform-level inactivity.
    SelfPaced,
    /// Fixed response window; expiry is evaluated as a miss.
    Window(Duration),
    /// Wall-clock countdown with a live display refresh every `tick`.
    Countdown { total: Duration, tick: Duration },
}

/// Per-test variation point consumed by the shared [`Controller`].
pub trait TestLogic: Send + Sync {
    fn kind(&self) -> TestKind;

    /// Instructions text shown before the first iteration.
    fn instructions(&self) -> String;

    /// Wait policy for `iteration`.
    fn timeout(&self, iteration: u32) -> TimeoutPolicy;

    /// Memorization or pre-target delay before responses are accepted.
    fn presentation_delay(&self, _stimulus: &Stimulus) -> Option<Duration> {
        None
    }

    /// Seed working variables at run start.
    fn on_start(&self, _session: &mut Session) {}

    /// Prompt sent when the response window opens, if the test needs one.
    fn response_prompt(&self, _iteration: u32) -> Option<OutboundMessage> {
        None
    }

    /// A press that arrived during the presentation delay. Returning a
    /// record scores it (reaction: a failed attempt); `None` ignores it.
    fn on_premature(
        &self,
        _iteration: u32,
        _input: &ResponseInput,
        _session: &mut Session,
    ) -> Option<IterationRecord> {
        None
    }

    /// Evaluate a response against the current stimulus.
    fn evaluate(
        &self,
        iteration: u32,
        stimulus: &Stimulus,
        input: &ResponseInput,
        latency: Duration,
        session: &mut Session,
    ) -> Evaluation;

    /// The response window elapsed with no qualifying response. Returning a
    /// record scores it as a miss; `None` ends the run as completed.
    fn on_window_expiry(
        &self,
        _iteration: u32,
        _stimulus: &Stimulus,
        _session: &mut Session,
    ) -> Option<IterationRecord> {
        None
    }

    /// Short feedback shown between iterations, if any.
    fn feedback(&self, _record: &IterationRecord) -> Option<String> {
        None
    }

    /// Continuation policy: the only real variation across the six tests.
    fn decide(&self, records: &[IterationRecord], session: &Session) -> Continuation;

    /// Translate the run into this test's Result Record fields.
    fn metrics(
        &self,
        records: &[IterationRecord],
        session: &Session,
        elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics;

    /// Human-readable end-of-run summary.
    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String;
}

/// Plain-data result of a finished run, handed to the menu shell. Turning
/// this into a transport call is the shell's job, never the controller's.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub chat_id: ChatId,
    pub kind: TestKind,
    pub test_name: String,
    pub status: RunStatus,
    pub error_occurred: bool,
    pub saved: bool,
    pub summary: String,
    /// Whether a profile is still registered (drives menu vs re-register).
    pub profile_active: bool,
}

/// Core infrastructure shared by every controller.
///
/// Mirrors one instance of each collaborator so controllers stay cheap to
/// create per run.
#[derive(Clone)]
pub struct ControllerCore {
    store: SessionStore,
    provider: Arc<dyn StimulusProvider>,
    sink: Arc<dyn ResultSink>,
    transport: Arc<dyn ChatTransport>,
    outcomes: mpsc::UnboundedSender<OutcomeReport>,
}

impl ControllerCore {
    pub fn new(
        store: SessionStore,
        provider: Arc<dyn StimulusProvider>,
        sink: Arc<dyn ResultSink>,
        transport: Arc<dyn ChatTransport>,
        outcomes: mpsc::UnboundedSender<OutcomeReport>,
    ) -> Self {
        Self {
            store,
            provider,
            sink,
            transport,
            outcomes,
        }
    }

    #[inline]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    #[inline]
    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    #[inline]
    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }
}

/// Deferred-callback identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerEvent {
    /// Memorization/pre-target delay elapsed.
    PresentationDone,
    /// The fixed response window elapsed.
    WindowExpiry,
    /// One countdown tick elapsed.
    CountdownTick,
    /// Inter-iteration feedback pause elapsed.
    Advance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Instructions,
    Presenting,
    AwaitingResponse,
    InterIteration,
    ConfirmRetry,
    Finishing,
    Done(RunStatus),
}

impl RunPhase {
    fn session_tag(self) -> Option<PhaseState> {
        match self {
            RunPhase::Instructions => Some(PhaseState::Instructions),
            RunPhase::Presenting | RunPhase::InterIteration => Some(PhaseState::Presenting),
            RunPhase::AwaitingResponse => Some(PhaseState::AwaitingResponse),
            RunPhase::ConfirmRetry => Some(PhaseState::ConfirmRetry),
            RunPhase::Finishing => Some(PhaseState::Finishing),
            RunPhase::Done(_) => None,
        }
    }
}

struct RunState {
    phase: RunPhase,
    /// Bumped on every transition; stale-callback guard token.
    epoch: u64,
    iteration: u32,
    current: Option<Stimulus>,
    records: Vec<IterationRecord>,
    started_at: Instant,
    presented_at: Option<Instant>,
    timers: Vec<AbortHandle>,
    countdown_left: Duration,
    countdown_tick: Duration,
    countdown_msg: Option<MessageId>,
    error_occurred: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::Instructions,
            epoch: 0,
            iteration: 0,
            current: None,
            records: Vec::new(),
            started_at: Instant::now(),
            presented_at: None,
            timers: Vec::new(),
            countdown_left: Duration::ZERO,
            countdown_tick: Duration::ZERO,
            countdown_msg: None,
            error_occurred: false,
        }
    }

    /// Enter a new phase: bump the epoch (invalidating every outstanding
    /// deferred callback) and abort their tasks.
    fn transition(&mut self, phase: RunPhase) {
        self.epoch += 1;
        for handle in self.timers.drain(..) {
            handle.abort();
        }
        self.phase = phase;
    }
}

/// One running test: the shared state machine bound to a `(chat, test)`
/// pair. Created by the dispatcher when the user selects the test, discarded
/// after the terminal outcome.
pub struct Controller {
    core: ControllerCore,
    logic: Arc<dyn TestLogic>,
    display_name: &'static str,
    chat_id: ChatId,
    profile: Profile,
    run: Mutex<RunState>,
}

impl Controller {
    pub fn new(
        core: ControllerCore,
        logic: Arc<dyn TestLogic>,
        display_name: &'static str,
        chat_id: ChatId,
        profile: Profile,
    ) -> Arc<Self> {
        Arc::new(Self {
            core,
            logic,
            display_name,
            chat_id,
            profile,
            run: Mutex::new(RunState::new()),
        })
    }

    pub fn kind(&self) -> TestKind {
        self.logic.kind()
    }

    /// Whether this controller has reached a terminal outcome.
    pub async fn is_done(&self) -> bool {
        matches!(self.run.lock().await.phase, RunPhase::Done(_))
    }

    /// Terminal status, once reached.
    pub async fn status(&self) -> Option<RunStatus> {
        match self.run.lock().await.phase {
            RunPhase::Done(status) => Some(status),
            _ => None,
        }
    }

    /// Records evaluated so far (test observability).
    pub async fn record_count(&self) -> usize {
        self.run.lock().await.records.len()
    }

    /// Enter `Instructions`: snapshot the profile into the session and show
    /// the instructions message.
    pub async fn start(self: &Arc<Self>) {
        let mut run = self.run.lock().await;
        let kind = self.kind();
        info!(chat_id = %self.chat_id, test = %kind, "Test run starting");

        let logic = Arc::clone(&self.logic);
        let profile = self.profile.clone();
        let chat_id = self.chat_id;
        self.core
            .store
            .with_session(chat_id, |session| {
                if session.profile.is_none() {
                    session.profile = Some(profile.clone());
                }
                session.phase = Some(ActivePhase {
                    kind,
                    state: PhaseState::Instructions,
                });
                session.set_var(kind, "profile", json!(profile));
                session.set_var(kind, "chat_id", json!(chat_id.0));
                logic.on_start(session);
            })
            .await;

        let message = OutboundMessage::text(self.logic.instructions())
            .with_keyboard(vec![vec![KEY_BEGIN.to_string(), KEY_STOP.to_string()]]);
        if let Err(e) = self.core.transport.send(self.chat_id, message).await {
            warn!(chat_id = %self.chat_id, error = %e, "Failed to render instructions");
            self.finish_locked(&mut run, RunStatus::Interrupted, true).await;
        }
    }

    /// The user acknowledged the instructions; present iteration 1.
    pub async fn acknowledge(self: &Arc<Self>) {
        let mut run = self.run.lock().await;
        if !matches!(run.phase, RunPhase::Instructions) {
            debug!(chat_id = %self.chat_id, "Acknowledge ignored outside Instructions");
            return;
        }
        run.started_at = Instant::now();
        self.present_locked(&mut run, 1).await;
    }

    /// Route a qualifying user response into the state machine.
    pub async fn handle_input(self: &Arc<Self>, input: ResponseInput) {
        let mut run = self.run.lock().await;
        match run.phase {
            RunPhase::Presenting => {
                let logic = Arc::clone(&self.logic);
                let iteration = run.iteration;
                let premature = self
                    .core
                    .store
                    .with_session(self.chat_id, |s| logic.on_premature(iteration, &input, s))
                    .await;
                match premature {
                    Some(record) => self.score_locked(&mut run, record, false).await,
                    None => debug!(chat_id = %self.chat_id, "Input ignored during presentation"),
                }
            }
            RunPhase::AwaitingResponse => {
                let stimulus = match run.current.clone() {
                    Some(s) => s,
                    None => return,
                };
                let latency = run
                    .presented_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                let logic = Arc::clone(&self.logic);
                let iteration = run.iteration;
                let evaluation = self
                    .core
                    .store
                    .with_session(self.chat_id, |s| {
                        logic.evaluate(iteration, &stimulus, &input, latency, s)
                    })
                    .await;
                match evaluation {
                    Evaluation::Scored(record) => self.score_locked(&mut run, record, false).await,
                    Evaluation::Rescored(record) => self.score_locked(&mut run, record, true).await,
                    Evaluation::Accumulated => {}
                    Evaluation::Ignored => {
                        debug!(chat_id = %self.chat_id, "Non-qualifying response ignored")
                    }
                }
            }
            RunPhase::ConfirmRetry => match input {
                ResponseInput::Key(ref key) if key == KEY_RETRY => {
                    let next = run.iteration + 1;
                    self.present_locked(&mut run, next).await;
                }
                ResponseInput::Key(ref key) if key == KEY_STOP => {
                    self.finish_locked(&mut run, RunStatus::Interrupted, false).await;
                }
                _ => debug!(chat_id = %self.chat_id, "Input ignored during retry confirm"),
            },
            RunPhase::Instructions
            | RunPhase::InterIteration
            | RunPhase::Finishing
            | RunPhase::Done(_) => {
                debug!(chat_id = %self.chat_id, phase = ?run.phase, "Input ignored");
            }
        }
    }

    /// Explicit stop request (user command or in-test cancel action).
    pub async fn request_stop(self: &Arc<Self>) {
        let mut run = self.run.lock().await;
        if matches!(run.phase, RunPhase::Done(_)) {
            return;
        }
        info!(chat_id = %self.chat_id, test = %self.kind(), "Stop requested");
        self.finish_locked(&mut run, RunStatus::Interrupted, false).await;
    }

    async fn present_locked(self: &Arc<Self>, run: &mut RunState, iteration: u32) {
        run.transition(RunPhase::Presenting);
        run.iteration = iteration;
        self.tag_session(RunPhase::Presenting).await;

        let kind = self.kind();
        let provider = Arc::clone(&self.core.provider);
        let fetched: StimulusResult<Stimulus> = self
            .core
            .store
            .with_session(self.chat_id, |s| provider.next_stimulus(kind, iteration, s))
            .await;

        let stimulus = match fetched {
            Ok(s) => s,
            Err(e) => {
                warn!(chat_id = %self.chat_id, test = %kind, error = %e, "Stimulus unavailable");
                self.finish_locked(run, RunStatus::Interrupted, true).await;
                return;
            }
        };

        let message =
            OutboundMessage::text(stimulus.prompt_text()).with_keyboard(stimulus.keyboard());
        if let Err(e) = self.core.transport.send(self.chat_id, message).await {
            warn!(chat_id = %self.chat_id, test = %kind, error = %e, "Failed to render stimulus");
            self.finish_locked(run, RunStatus::Interrupted, true).await;
            return;
        }

        let delay = self.logic.presentation_delay(&stimulus);
        run.current = Some(stimulus);

        match delay {
            Some(delay) => self.schedule(run, TimerEvent::PresentationDone, delay),
            None => self.enter_awaiting_locked(run).await,
        }
    }

    async fn enter_awaiting_locked(self: &Arc<Self>, run: &mut RunState) {
        run.transition(RunPhase::AwaitingResponse);
        run.presented_at = Some(Instant::now());
        self.tag_session(RunPhase::AwaitingResponse).await;

        if let Some(prompt) = self.logic.response_prompt(run.iteration) {
            if let Err(e) = self.core.transport.send(self.chat_id, prompt).await {
                warn!(chat_id = %self.chat_id, error = %e, "Failed to render response prompt");
                self.finish_locked(run, RunStatus::Interrupted, true).await;
                return;
            }
        }

        match self.logic.timeout(run.iteration) {
            TimeoutPolicy::SelfPaced => {}
            TimeoutPolicy::Window(window) => {
                self.schedule(run, TimerEvent::WindowExpiry, window);
            }
            TimeoutPolicy::Countdown { total, tick } => {
                run.countdown_left = total;
                run.countdown_tick = tick;
                let text = format!("Time left: {}s", total.as_secs());
                run.countdown_msg = self
                    .core
                    .transport
                    .send(self.chat_id, OutboundMessage::text(text))
                    .await
                    .ok();
                self.schedule(run, TimerEvent::CountdownTick, tick.min(total));
            }
        }
    }

    async fn score_locked(self: &Arc<Self>, run: &mut RunState, record: IterationRecord, replace: bool) {
        if replace {
            run.records.pop();
        }
        run.records.push(record.clone());

        let logic = Arc::clone(&self.logic);
        let records = run.records.clone();
        let continuation = self
            .core
            .store
            .with_session(self.chat_id, |s| logic.decide(&records, s))
            .await;

        debug!(
            chat_id = %self.chat_id,
            test = %self.kind(),
            iteration = record.iteration,
            correct = record.correct,
            continuation = ?continuation,
            "Iteration evaluated"
        );

        match continuation {
            Continuation::Next => {
                let next = run.iteration + 1;
                self.present_locked(run, next).await;
            }
            Continuation::NextAfter(delay) => {
                run.transition(RunPhase::InterIteration);
                self.tag_session(RunPhase::InterIteration).await;
                if let Some(text) = self.logic.feedback(&record) {
                    if let Err(e) = self
                        .core
                        .transport
                        .send(self.chat_id, OutboundMessage::text(text))
                        .await
                    {
                        warn!(chat_id = %self.chat_id, error = %e, "Failed to render feedback");
                        self.finish_locked(run, RunStatus::Interrupted, true).await;
                        return;
                    }
                }
                self.schedule(run, TimerEvent::Advance, delay);
            }
            Continuation::ConfirmThenNext(prompt) => {
                run.transition(RunPhase::ConfirmRetry);
                self.tag_session(RunPhase::ConfirmRetry).await;
                let message = OutboundMessage::text(prompt)
                    .with_keyboard(vec![vec![KEY_RETRY.to_string(), KEY_STOP.to_string()]]);
                if let Err(e) = self.core.transport.send(self.chat_id, message).await {
                    warn!(chat_id = %self.chat_id, error = %e, "Failed to render retry prompt");
                    self.finish_locked(run, RunStatus::Interrupted, true).await;
                }
            }
            Continuation::Finish(status) => {
                self.finish_locked(run, status, false).await;
            }
        }
    }

    async fn on_timer(self: Arc<Self>, event: TimerEvent, epoch: u64) {
        let mut run = self.run.lock().await;
        if run.epoch != epoch {
            // Stale callback: the phase that scheduled it is gone.
            debug!(
                chat_id = %self.chat_id,
                event = ?event,
                scheduled_epoch = epoch,
                current_epoch = run.epoch,
                "Stale timer ignored"
            );
            return;
        }

        match event {
            TimerEvent::PresentationDone => {
                self.enter_awaiting_locked(&mut run).await;
            }
            TimerEvent::WindowExpiry => {
                let stimulus = match run.current.clone() {
                    Some(s) => s,
                    None => return,
                };
                let logic = Arc::clone(&self.logic);
                let iteration = run.iteration;
                let miss = self
                    .core
                    .store
                    .with_session(self.chat_id, |s| {
                        logic.on_window_expiry(iteration, &stimulus, s)
                    })
                    .await;
                match miss {
                    Some(record) => self.score_locked(&mut run, record, false).await,
                    None => self.finish_locked(&mut run, RunStatus::Completed, false).await,
                }
            }
            TimerEvent::CountdownTick => {
                run.countdown_left = run.countdown_left.saturating_sub(run.countdown_tick);
                if run.countdown_left.is_zero() {
                    self.finish_locked(&mut run, RunStatus::Completed, false).await;
                    return;
                }
                // Display refresh is best-effort; a failed edit does not end
                // the run.
                if let Some(message_id) = run.countdown_msg {
                    let text = format!("Time left: {}s", run.countdown_left.as_secs());
                    if let Err(e) = self
                        .core
                        .transport
                        .edit(self.chat_id, message_id, OutboundMessage::text(text))
                        .await
                    {
                        warn!(chat_id = %self.chat_id, error = %e, "Countdown refresh failed");
                    }
                }
                // The final tick may be shorter than the interval so the run
                // ends exactly at the configured duration.
                let tick = run.countdown_tick.min(run.countdown_left);
                self.schedule(&mut run, TimerEvent::CountdownTick, tick);
            }
            TimerEvent::Advance => {
                let next = run.iteration + 1;
                self.present_locked(&mut run, next).await;
            }
        }
    }

    /// Terminal sequence. Idempotent: a second entry observes `Done` and
    /// returns without persisting or reporting again.
    async fn finish_locked(
        self: &Arc<Self>,
        run: &mut RunState,
        status: RunStatus,
        error_occurred: bool,
    ) {
        if matches!(run.phase, RunPhase::Done(_)) {
            debug!(chat_id = %self.chat_id, "Finishing re-entered after terminal state; no-op");
            return;
        }

        run.transition(RunPhase::Finishing);
        run.error_occurred = run.error_occurred || error_occurred;
        self.tag_session(RunPhase::Finishing).await;

        let kind = self.kind();
        let interrupted = matches!(status, RunStatus::Interrupted);
        let elapsed = run.started_at.elapsed();

        // Step 1: translate and persist. Failure is reported, never raised.
        let logic = Arc::clone(&self.logic);
        let records = run.records.clone();
        let metrics = self
            .core
            .store
            .with_session(self.chat_id, |s| {
                logic.metrics(&records, s, elapsed, interrupted)
            })
            .await;

        let saved = match self.core.sink.write_result(&self.profile, &metrics).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    chat_id = %self.chat_id,
                    test = %kind,
                    error = %e,
                    "Result write failed; reporting unsaved results"
                );
                false
            }
        };

        // Step 2: cleanup. Timers were already cancelled by the transition;
        // purge working variables and release the phase tag, keeping the
        // profile.
        self.core
            .store
            .with_session(self.chat_id, |session| {
                session.purge_test_vars(kind);
                session.phase = None;
            })
            .await;

        run.phase = RunPhase::Done(status);

        // Step 3: notify. The report is plain data; the shell renders it.
        let summary = self.logic.summary(&metrics, status, saved);
        let profile_active = self
            .core
            .store
            .get(self.chat_id)
            .await
            .map(|s| s.profile.is_some())
            .unwrap_or(false);

        info!(
            chat_id = %self.chat_id,
            test = %kind,
            status = ?status,
            error = run.error_occurred,
            saved,
            records = run.records.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Test run finished"
        );

        let report = OutcomeReport {
            chat_id: self.chat_id,
            kind,
            test_name: self.display_name.to_string(),
            status,
            error_occurred: run.error_occurred,
            saved,
            summary,
            profile_active,
        };
        if self.core.outcomes.send(report).is_err() {
            warn!(chat_id = %self.chat_id, "Outcome receiver dropped");
        }
    }

    async fn tag_session(&self, phase: RunPhase) {
        let kind = self.kind();
        self.core
            .store
            .with_session(self.chat_id, |session| {
                session.phase = phase.session_tag().map(|state| ActivePhase { kind, state });
            })
            .await;
    }

    /// Spawn a deferred callback carrying the current epoch. The handle is
    /// retained so any later transition can abort it; an aborted-but-racing
    /// callback still no-ops via the epoch check.
    fn schedule(self: &Arc<Self>, run: &mut RunState, event: TimerEvent, delay: Duration) {
        // Repeating timers reschedule within one epoch; drop the handles of
        // callbacks that already ran.
        run.timers.retain(|h| !h.is_finished());
        let epoch = run.epoch;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = weak.upgrade() {
                controller.on_timer(event, epoch).await;
            }
        });
        run.timers.push(handle.abort_handle());
    }
}
