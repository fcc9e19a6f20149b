//! Simple reaction time.
//!
//! Each attempt shows a waiting screen for a random delay, then the target.
//! A press while the target is shown, inside the response window, succeeds
//! and ends the run. A premature press or a window expiry fails the attempt;
//! failed attempts are retried after user confirmation, up to a configured
//! maximum.
//!
//! Measured latency is reduced by a configured transport-delay correction.
//! The correction is an estimate, kept configurable on purpose.

use std::time::Duration;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::{Stimulus, StimulusContent};
use crate::storage::{ReactionMetrics, TestMetrics};
use crate::transport::OutboundMessage;

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy, KEY_PRESS,
};

/// Reaction-time lifecycle policy.
pub struct ReactionLogic {
    max_attempts: u32,
    window: Duration,
    latency_correction: Duration,
}

impl ReactionLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            max_attempts: config.reaction.max_attempts,
            window: Duration::from_millis(config.reaction.window_ms),
            latency_correction: Duration::from_millis(config.reaction.latency_correction_ms),
        }
    }
}

impl TestLogic for ReactionLogic {
    fn kind(&self) -> TestKind {
        TestKind::Reaction
    }

    fn instructions(&self) -> String {
        format!(
            "Reaction time. Wait for the green circle, then press the button as \
             fast as you can. Pressing early or slower than {}ms fails the \
             attempt; you get up to {} attempts.",
            self.window.as_millis(),
            self.max_attempts
        )
    }

    fn timeout(&self, _iteration: u32) -> TimeoutPolicy {
        TimeoutPolicy::Window(self.window)
    }

    fn presentation_delay(&self, stimulus: &Stimulus) -> Option<Duration> {
        match stimulus.content {
            StimulusContent::ReactionCue { delay_ms } => Some(Duration::from_millis(delay_ms)),
            _ => None,
        }
    }

    fn response_prompt(&self, _iteration: u32) -> Option<OutboundMessage> {
        Some(
            OutboundMessage::text("\u{1F7E2} PRESS NOW!")
                .with_keyboard(vec![vec![KEY_PRESS.to_string()]]),
        )
    }

    fn on_premature(
        &self,
        iteration: u32,
        input: &ResponseInput,
        _session: &mut Session,
    ) -> Option<IterationRecord> {
        match input {
            ResponseInput::Key(_) => Some(IterationRecord {
                iteration,
                correct: false,
                latency_ms: 0,
                response: "premature".to_string(),
                expected: KEY_PRESS.to_string(),
            }),
            ResponseInput::Text(_) => None,
        }
    }

    fn evaluate(
        &self,
        iteration: u32,
        _stimulus: &Stimulus,
        input: &ResponseInput,
        latency: Duration,
        _session: &mut Session,
    ) -> Evaluation {
        match input {
            ResponseInput::Key(key) if key == KEY_PRESS => {
                let corrected = latency.saturating_sub(self.latency_correction);
                Evaluation::Scored(IterationRecord {
                    iteration,
                    correct: true,
                    latency_ms: corrected.as_millis() as u64,
                    response: KEY_PRESS.to_string(),
                    expected: KEY_PRESS.to_string(),
                })
            }
            _ => Evaluation::Ignored,
        }
    }

    fn on_window_expiry(
        &self,
        iteration: u32,
        _stimulus: &Stimulus,
        _session: &mut Session,
    ) -> Option<IterationRecord> {
        Some(IterationRecord {
            iteration,
            correct: false,
            latency_ms: self.window.as_millis() as u64,
            response: "miss".to_string(),
            expected: KEY_PRESS.to_string(),
        })
    }

    fn decide(&self, records: &[IterationRecord], _session: &Session) -> Continuation {
        if records.last().map(|r| r.correct).unwrap_or(false) {
            return Continuation::Finish(RunStatus::Completed);
        }
        if records.len() as u32 >= self.max_attempts {
            return Continuation::Finish(RunStatus::Failed);
        }
        Continuation::ConfirmThenNext("Missed. Try again?".to_string())
    }

    fn metrics(
        &self,
        records: &[IterationRecord],
        _session: &Session,
        _elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        TestMetrics::Reaction(ReactionMetrics {
            best_ms: records
                .iter()
                .filter(|r| r.correct)
                .map(|r| r.latency_ms)
                .min(),
            attempts: records.len() as u32,
            succeeded: records.iter().any(|r| r.correct),
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Reaction(m) => m,
            _ => return String::new(),
        };
        let mut text = match m.best_ms {
            Some(ms) => format!("Reaction time: {}ms ({} attempts).", ms, m.attempts),
            None => format!("Reaction time: no successful press in {} attempts.", m.attempts),
        };
        if status == RunStatus::Interrupted {
            text.push_str(" The test was interrupted; partial results recorded.");
        }
        if !saved {
            text.push_str(" Warning: results may not have saved.");
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatId;

    fn logic() -> ReactionLogic {
        ReactionLogic::new(&BatteryConfig::default())
    }

    fn cue(delay_ms: u64) -> Stimulus {
        Stimulus {
            content: StimulusContent::ReactionCue { delay_ms },
            expected: KEY_PRESS.to_string(),
        }
    }

    fn miss(iteration: u32) -> IterationRecord {
        IterationRecord {
            iteration,
            correct: false,
            latency_ms: 1000,
            response: "miss".to_string(),
            expected: KEY_PRESS.to_string(),
        }
    }

    #[test]
    fn test_press_applies_latency_correction() {
        let logic = logic();
        let mut session = Session::new(ChatId(1));
        let eval = logic.evaluate(
            1,
            &cue(2000),
            &ResponseInput::Key(KEY_PRESS.to_string()),
            Duration::from_millis(400),
            &mut session,
        );
        match eval {
            Evaluation::Scored(r) => {
                assert!(r.correct);
                assert_eq!(r.latency_ms, 250);
            }
            other => panic!("expected scored, got {:?}", other),
        }
    }

    #[test]
    fn test_correction_never_underflows() {
        let logic = logic();
        let mut session = Session::new(ChatId(1));
        let eval = logic.evaluate(
            1,
            &cue(2000),
            &ResponseInput::Key(KEY_PRESS.to_string()),
            Duration::from_millis(100),
            &mut session,
        );
        match eval {
            Evaluation::Scored(r) => assert_eq!(r.latency_ms, 0),
            other => panic!("expected scored, got {:?}", other),
        }
    }

    #[test]
    fn test_premature_press_fails_attempt() {
        let logic = logic();
        let mut session = Session::new(ChatId(1));
        let record = logic
            .on_premature(1, &ResponseInput::Key(KEY_PRESS.to_string()), &mut session)
            .unwrap();
        assert!(!record.correct);
        assert_eq!(record.response, "premature");
    }

    #[test]
    fn test_success_finishes_completed() {
        let logic = logic();
        let session = Session::new(ChatId(1));
        let mut records = vec![miss(1)];
        records.push(IterationRecord {
            iteration: 2,
            correct: true,
            latency_ms: 230,
            response: KEY_PRESS.to_string(),
            expected: KEY_PRESS.to_string(),
        });
        assert_eq!(
            logic.decide(&records, &session),
            Continuation::Finish(RunStatus::Completed)
        );
    }

    #[test]
    fn test_miss_before_limit_asks_for_retry() {
        let logic = logic();
        let session = Session::new(ChatId(1));
        assert!(matches!(
            logic.decide(&[miss(1)], &session),
            Continuation::ConfirmThenNext(_)
        ));
    }

    #[test]
    fn test_exhausted_attempts_finish_failed_without_retry_prompt() {
        let logic = ReactionLogic {
            max_attempts: 2,
            window: Duration::from_millis(1000),
            latency_correction: Duration::from_millis(150),
        };
        let session = Session::new(ChatId(1));
        assert_eq!(
            logic.decide(&[miss(1), miss(2)], &session),
            Continuation::Finish(RunStatus::Failed)
        );
    }

    #[test]
    fn test_metrics_pick_best_success() {
        let logic = logic();
        let session = Session::new(ChatId(1));
        let records = vec![
            miss(1),
            IterationRecord {
                iteration: 2,
                correct: true,
                latency_ms: 240,
                response: KEY_PRESS.to_string(),
                expected: KEY_PRESS.to_string(),
            },
        ];
        let metrics = logic.metrics(&records, &session, Duration::from_secs(10), false);
        match metrics {
            TestMetrics::Reaction(m) => {
                assert_eq!(m.best_ms, Some(240));
                assert_eq!(m.attempts, 2);
                assert!(m.succeeded);
            }
            other => panic!("wrong metrics: {:?}", other),
        }
    }

    #[test]
    fn test_presentation_delay_reads_cue() {
        let logic = logic();
        assert_eq!(
            logic.presentation_delay(&cue(1750)),
            Some(Duration::from_millis(1750))
        );
    }
}
