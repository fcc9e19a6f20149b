//! End-to-end lifecycle tests for the shared test controller.
//!
//! Uses a scripted stimulus provider and paused tokio time so presentation
//! delays, response windows and countdowns run deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cognitive_battery::battery::{
    Controller, ControllerCore, OutcomeReport, ResponseInput, RunStatus, TestCatalog, TestKind,
    KEY_PRESS, KEY_RETRY,
};
use cognitive_battery::config::BatteryConfig;
use cognitive_battery::error::{StimulusError, StimulusResult};
use cognitive_battery::session::{ChatId, Profile, Session, SessionStore};
use cognitive_battery::stimulus::{Stimulus, StimulusContent, StimulusProvider};
use cognitive_battery::storage::{MemorySink, ResultSink, TestMetrics};
use cognitive_battery::transport::{ChatTransport, MemoryTransport};

const CHAT: ChatId = ChatId(7);

/// Deterministic provider: fixed answers, fixed reaction delay.
struct ScriptedProvider;

impl StimulusProvider for ScriptedProvider {
    fn next_stimulus(
        &self,
        kind: TestKind,
        iteration: u32,
        session: &mut Session,
    ) -> StimulusResult<Stimulus> {
        let stimulus = match kind {
            TestKind::Corsi => {
                let length = session
                    .get_var(TestKind::Corsi, "length")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(2) as u8;
                let cells: Vec<u8> = (1..=length).collect();
                let expected = cells.iter().map(|c| c.to_string()).collect();
                Stimulus {
                    content: StimulusContent::Sequence { cells },
                    expected,
                }
            }
            TestKind::Stroop => Stimulus {
                content: StimulusContent::ColorWord {
                    word: "red".to_string(),
                    ink: "blue".to_string(),
                    options: vec!["red".into(), "green".into(), "blue".into(), "yellow".into()],
                },
                expected: "blue".to_string(),
            },
            TestKind::Reaction => Stimulus {
                content: StimulusContent::ReactionCue { delay_ms: 500 },
                expected: KEY_PRESS.to_string(),
            },
            TestKind::Fluency => Stimulus {
                content: StimulusContent::Category {
                    name: "animals".to_string(),
                },
                expected: String::new(),
            },
            TestKind::Rotation => Stimulus {
                content: StimulusContent::RotatedFigure {
                    figure_id: format!("fig-{:02}", iteration),
                    options: vec!["1".into(), "2".into(), "3".into(), "4".into()],
                },
                expected: "2".to_string(),
            },
            TestKind::Raven => Stimulus {
                content: StimulusContent::Matrix {
                    task_id: format!("matrix-{:02}", iteration),
                    options: (1..=6).map(|n| n.to_string()).collect(),
                },
                expected: "3".to_string(),
            },
        };
        Ok(stimulus)
    }
}

/// Provider with nothing to offer.
struct EmptyProvider;

impl StimulusProvider for EmptyProvider {
    fn next_stimulus(
        &self,
        kind: TestKind,
        iteration: u32,
        _session: &mut Session,
    ) -> StimulusResult<Stimulus> {
        Err(StimulusError::NoContent { kind, iteration })
    }
}

struct Harness {
    store: SessionStore,
    sink: Arc<MemorySink>,
    transport: Arc<MemoryTransport>,
    reports: mpsc::UnboundedReceiver<OutcomeReport>,
    core: ControllerCore,
    config: BatteryConfig,
}

fn harness_with(config: BatteryConfig, provider: Arc<dyn StimulusProvider>) -> Harness {
    let store = SessionStore::new();
    let sink = Arc::new(MemorySink::new());
    let transport = Arc::new(MemoryTransport::new());
    let (outcomes, reports) = mpsc::unbounded_channel();
    let core = ControllerCore::new(
        store.clone(),
        provider,
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        outcomes,
    );
    Harness {
        store,
        sink,
        transport,
        reports,
        core,
        config,
    }
}

fn harness() -> Harness {
    harness_with(BatteryConfig::default(), Arc::new(ScriptedProvider))
}

fn profile() -> Profile {
    Profile {
        unique_id: "subj-01".to_string(),
        display_name: "Ida".to_string(),
        age: 29,
        external_user_id: 4242,
    }
}

impl Harness {
    fn controller(&self, kind: TestKind) -> Arc<Controller> {
        let catalog = TestCatalog::standard(&self.config);
        let entry = catalog.get(kind).expect("kind registered").clone();
        Controller::new(
            self.core.clone(),
            entry.logic,
            entry.display_name,
            CHAT,
            profile(),
        )
    }
}

/// Let pending timers fire under paused time.
async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms + 10)).await;
}

// Scenario: sequence memory, correct answers up through length 5 and two
// misses at 5. The re-attempt record replaces the failed one, so the run
// ends with one record per length.
#[tokio::test(start_paused = true)]
async fn test_corsi_success_path_keeps_one_record_per_length() {
    let mut h = harness();
    let controller = h.controller(TestKind::Corsi);
    controller.start().await;
    controller.acknowledge().await;

    // Correct at lengths 2, 3 and 4.
    for length in 2u64..=4 {
        advance(length * 1000).await; // memorization
        let answer: String = (1..=length).map(|c| c.to_string()).collect();
        controller
            .handle_input(ResponseInput::Text(answer))
            .await;
        advance(1200).await; // feedback pause
    }

    // Two consecutive misses at length 5.
    advance(5000).await;
    controller
        .handle_input(ResponseInput::Text("99999".to_string()))
        .await;
    advance(1200).await;
    advance(5000).await;
    controller
        .handle_input(ResponseInput::Text("99999".to_string()))
        .await;

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Completed);
    assert!(!report.error_occurred);
    assert_eq!(controller.record_count().await, 4);

    match h.sink.row("subj-01").and_then(|r| r.corsi) {
        Some(m) => {
            assert_eq!(m.max_length, 4);
            assert_eq!(m.total_errors, 2);
            assert!(!m.interrupted);
        }
        None => panic!("corsi metrics missing"),
    }
}

// Scenario: reaction-time exhaustion with max_attempts = 2. Two expired
// windows fail the run without a third retry prompt.
#[tokio::test(start_paused = true)]
async fn test_reaction_exhaustion_fails_without_extra_retry_prompt() {
    let mut config = BatteryConfig::default();
    config.reaction.max_attempts = 2;
    let mut h = harness_with(config, Arc::new(ScriptedProvider));
    let controller = h.controller(TestKind::Reaction);
    controller.start().await;
    controller.acknowledge().await;

    // Attempt 1: pre-target delay, then let the window expire.
    advance(500).await;
    advance(1000).await;
    controller
        .handle_input(ResponseInput::Key(KEY_RETRY.to_string()))
        .await;

    // Attempt 2: same, but exhaustion ends the run.
    advance(500).await;
    advance(1000).await;

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Failed);
    assert!(!report.error_occurred);
    assert_eq!(controller.record_count().await, 2);

    let retry_prompts = h
        .transport
        .sent_texts()
        .iter()
        .filter(|t| t.contains("Try again"))
        .count();
    assert_eq!(retry_prompts, 1);

    match h.sink.row("subj-01").and_then(|r| r.reaction) {
        Some(m) => {
            assert_eq!(m.attempts, 2);
            assert_eq!(m.best_ms, None);
            assert!(!m.succeeded);
            assert!(!m.interrupted);
        }
        None => panic!("reaction metrics missing"),
    }
}

// Scenario: verbal fluency with no input at all finishes on its own at the
// configured duration with zero words.
#[tokio::test(start_paused = true)]
async fn test_fluency_duration_expiry_with_no_input() {
    let mut h = harness();
    let controller = h.controller(TestKind::Fluency);
    controller.start().await;
    controller.acknowledge().await;

    advance(60_000).await;

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Completed);
    assert!(!report.error_occurred);

    match h.sink.row("subj-01").and_then(|r| r.fluency) {
        Some(m) => {
            assert_eq!(m.word_count, 0);
            assert!(m.words.is_empty());
            assert!(!m.interrupted);
        }
        None => panic!("fluency metrics missing"),
    }
}

// A duration that is not a multiple of the refresh interval still ends the
// run exactly on time, not at the next full tick.
#[tokio::test(start_paused = true)]
async fn test_fluency_uneven_duration_ends_on_time() {
    let mut config = BatteryConfig::default();
    config.fluency.duration_secs = 65;
    let mut h = harness_with(config, Arc::new(ScriptedProvider));
    let controller = h.controller(TestKind::Fluency);
    controller.start().await;
    controller.acknowledge().await;

    tokio::time::sleep(Duration::from_millis(64_000)).await;
    assert!(h.reports.try_recv().is_err(), "run still live at 64s");

    advance(1_000).await;
    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Completed);
}

// Scenario: explicit stop after iteration 2 is presented. Only iteration 1
// was evaluated; exactly one write happens and no message follows the stop.
#[tokio::test(start_paused = true)]
async fn test_rotation_stop_mid_test_persists_partial_results() {
    let mut h = harness();
    let controller = h.controller(TestKind::Rotation);
    controller.start().await;
    controller.acknowledge().await;

    controller
        .handle_input(ResponseInput::Key("2".to_string()))
        .await;
    advance(1200).await; // feedback pause, iteration 2 now presented

    controller.request_stop().await;

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Interrupted);
    assert!(!report.error_occurred);
    assert!(report.profile_active);
    assert_eq!(controller.record_count().await, 1);
    assert_eq!(h.sink.write_count(), 1);

    match h.sink.row("subj-01").and_then(|r| r.rotation) {
        Some(m) => {
            assert_eq!(m.total, 1);
            assert_eq!(m.correct, 1);
            assert!(m.interrupted);
        }
        None => panic!("rotation metrics missing"),
    }

    // Starting the run installed the profile in the session, so the report
    // could offer the menu instead of re-registration.
    let session = h.store.get(CHAT).await.expect("session exists");
    assert_eq!(session.profile, Some(profile()));

    // All timers were cancelled; nothing more reaches the transport.
    let sent_before = h.transport.sent_count();
    advance(120_000).await;
    assert_eq!(h.transport.sent_count(), sent_before);
}

// Scenario: the provider has no content on the very first iteration. The run
// ends as an interrupted error with an interrupted row persisted.
#[tokio::test(start_paused = true)]
async fn test_missing_stimulus_on_first_iteration() {
    for kind in TestKind::ALL {
        let mut h = harness_with(BatteryConfig::default(), Arc::new(EmptyProvider));
        let controller = h.controller(kind);
        controller.start().await;
        controller.acknowledge().await;

        let report = h.reports.recv().await.expect("outcome report");
        assert_eq!(report.status, RunStatus::Interrupted, "kind {}", kind);
        assert!(report.error_occurred, "kind {}", kind);
        assert_eq!(controller.record_count().await, 0, "kind {}", kind);

        let row = h.sink.row("subj-01").expect("row persisted");
        let interrupted = match kind {
            TestKind::Corsi => row.corsi.map(|m| m.interrupted),
            TestKind::Stroop => row.stroop.map(|m| m.interrupted),
            TestKind::Reaction => row.reaction.map(|m| m.interrupted),
            TestKind::Fluency => row.fluency.map(|m| m.interrupted),
            TestKind::Rotation => row.rotation.map(|m| m.interrupted),
            TestKind::Raven => row.raven.map(|m| m.interrupted),
        };
        assert_eq!(interrupted, Some(true), "kind {}", kind);
    }
}

// A timer scheduled by an abandoned phase must not act after the stop.
#[tokio::test(start_paused = true)]
async fn test_stale_presentation_timer_is_ignored_after_stop() {
    let mut h = harness();
    let controller = h.controller(TestKind::Corsi);
    controller.start().await;
    controller.acknowledge().await;

    // Memorization timer is pending; stop before it fires.
    controller.request_stop().await;
    let sent_before = h.transport.sent_count();

    advance(10_000).await;

    assert_eq!(h.transport.sent_count(), sent_before);
    let session = h.store.get(CHAT).await.expect("session exists");
    assert_eq!(session.test_var_count(TestKind::Corsi), 0);
    assert!(!session.test_active());

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Interrupted);
}

// A stop racing a window expiry produces exactly one write and one report.
#[tokio::test(start_paused = true)]
async fn test_finishing_once_despite_stop_after_window_expiry() {
    let mut config = BatteryConfig::default();
    config.reaction.max_attempts = 1;
    let mut h = harness_with(config, Arc::new(ScriptedProvider));
    let controller = h.controller(TestKind::Reaction);
    controller.start().await;
    controller.acknowledge().await;

    advance(500).await;
    advance(1000).await; // window expiry finishes the run
    controller.request_stop().await; // late stop is a no-op

    let first = h.reports.recv().await.expect("one outcome report");
    assert_eq!(first.status, RunStatus::Failed);
    assert!(h.reports.try_recv().is_err(), "second report must not exist");
    assert_eq!(h.sink.write_count(), 1);
}

// Interrupting a test keeps the profile and leaves no working variables.
#[tokio::test(start_paused = true)]
async fn test_profile_survives_interruption_without_residual_vars() {
    let mut h = harness();
    h.store.set_profile(CHAT, profile()).await;

    let controller = h.controller(TestKind::Raven);
    controller.start().await;
    controller.acknowledge().await;
    controller
        .handle_input(ResponseInput::Key("3".to_string()))
        .await;
    controller.request_stop().await;

    let report = h.reports.recv().await.expect("outcome report");
    assert!(report.profile_active);

    let session = h.store.get(CHAT).await.expect("session exists");
    assert_eq!(session.profile, Some(profile()));
    assert_eq!(session.test_var_count(TestKind::Raven), 0);
    assert!(session.phase.is_none());
}

// Iteration numbers strictly increase and never trail the record count.
#[tokio::test(start_paused = true)]
async fn test_stroop_records_are_monotonic_and_complete() {
    let mut h = harness();
    let controller = h.controller(TestKind::Stroop);
    controller.start().await;
    controller.acknowledge().await;

    // 3 parts x 8 iterations, all answered by ink color.
    for _ in 0..24 {
        controller
            .handle_input(ResponseInput::Key("blue".to_string()))
            .await;
    }

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(controller.record_count().await, 24);

    match h.sink.row("subj-01").and_then(|r| r.stroop) {
        Some(m) => {
            assert_eq!(m.errors, 0);
            assert!(!m.interrupted);
        }
        None => panic!("stroop metrics missing"),
    }
}

// A sink failure is reported as unsaved but never aborts cleanup.
#[tokio::test(start_paused = true)]
async fn test_sink_failure_reports_unsaved_summary() {
    let mut h = harness();
    h.sink.fail_writes(true);
    let controller = h.controller(TestKind::Raven);
    controller.start().await;
    controller.acknowledge().await;
    controller.request_stop().await;

    let report = h.reports.recv().await.expect("outcome report");
    assert!(!report.saved);
    assert!(report.summary.contains("may not have saved"));

    let session = h.store.get(CHAT).await.expect("session exists");
    assert_eq!(session.test_var_count(TestKind::Raven), 0);
    assert!(!session.test_active());
}

// Fluency accumulates words across messages and scores them at expiry.
#[tokio::test(start_paused = true)]
async fn test_fluency_collects_distinct_words_until_expiry() {
    let mut h = harness();
    let controller = h.controller(TestKind::Fluency);
    controller.start().await;
    controller.acknowledge().await;

    controller
        .handle_input(ResponseInput::Text("cat dog".to_string()))
        .await;
    advance(20_000).await;
    controller
        .handle_input(ResponseInput::Text("dog horse".to_string()))
        .await;
    advance(40_000).await;

    let report = h.reports.recv().await.expect("outcome report");
    assert_eq!(report.status, RunStatus::Completed);

    match h.sink.row("subj-01").and_then(|r| r.fluency) {
        Some(m) => {
            assert_eq!(m.word_count, 3);
            assert_eq!(m.words, vec!["cat", "dog", "horse"]);
        }
        None => panic!("fluency metrics missing"),
    }
}

// The write for one test never disturbs another test's saved columns.
#[tokio::test(start_paused = true)]
async fn test_consecutive_tests_fill_separate_column_groups() {
    let mut h = harness();

    let raven = h.controller(TestKind::Raven);
    raven.start().await;
    raven.acknowledge().await;
    for _ in 0..10 {
        raven.handle_input(ResponseInput::Key("3".to_string())).await;
    }
    let report = h.reports.recv().await.expect("raven report");
    assert_eq!(report.status, RunStatus::Completed);

    let rotation = h.controller(TestKind::Rotation);
    rotation.start().await;
    rotation.acknowledge().await;
    rotation.request_stop().await;
    let report = h.reports.recv().await.expect("rotation report");
    assert_eq!(report.status, RunStatus::Interrupted);

    let row = h.sink.row("subj-01").expect("row exists");
    let raven_metrics = row.raven.expect("raven group saved");
    assert_eq!(raven_metrics.correct, 10);
    assert!(!raven_metrics.interrupted);
    assert!(row.rotation.expect("rotation group saved").interrupted);
    assert_eq!(h.sink.write_count(), 2);
}

// Metrics enum round-trips through the sink unchanged.
#[tokio::test]
async fn test_memory_sink_applies_only_named_group() {
    let sink = MemorySink::new();
    sink.ensure_row(&profile()).await.expect("ensure row");
    sink.write_result(
        &profile(),
        &TestMetrics::Raven(cognitive_battery::storage::RavenMetrics {
            correct: 6,
            total: 10,
            elapsed_ms: 81_000,
            interrupted: false,
        }),
    )
    .await
    .expect("write");

    assert!(sink
        .has_prior_result("subj-01", TestKind::Raven)
        .await
        .expect("query"));
    assert!(!sink
        .has_prior_result("subj-01", TestKind::Corsi)
        .await
        .expect("query"));
}
