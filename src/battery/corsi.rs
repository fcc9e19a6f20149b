//! Sequence memory (Corsi block-tapping).
//!
//! The sequence grows by one cell after each correct answer. A wrong answer
//! repeats the same length; a second consecutive wrong answer at one length
//! ends the run. A re-attempt replaces the record of the failed attempt, so
//! the run keeps exactly one record per sequence length.

use std::time::Duration;

use serde_json::json;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::Stimulus;
use crate::storage::{CorsiMetrics, TestMetrics};
use crate::transport::OutboundMessage;

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy,
};

/// Sequence-memory lifecycle policy.
pub struct CorsiLogic {
    start_length: u32,
    max_length: u32,
    error_limit: u32,
    memorize_ms_per_item: u64,
    feedback_delay: Duration,
}

impl CorsiLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            start_length: config.corsi.start_length,
            max_length: config.corsi.max_length,
            error_limit: config.corsi.error_limit,
            memorize_ms_per_item: config.corsi.memorize_ms_per_item,
            feedback_delay: Duration::from_millis(config.feedback_delay_ms),
        }
    }

    fn var(session: &Session, key: &str) -> u64 {
        session
            .get_var(TestKind::Corsi, key)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
}

impl TestLogic for CorsiLogic {
    fn kind(&self) -> TestKind {
        TestKind::Corsi
    }

    fn instructions(&self) -> String {
        format!(
            "Sequence memory. A sequence of cells lights up, starting at {} cells. \
             Memorize it while it is shown, then repeat it. One sequence length is \
             retried once after a mistake; two mistakes in a row end the test.",
            self.start_length
        )
    }

    fn timeout(&self, _iteration: u32) -> TimeoutPolicy {
        TimeoutPolicy::SelfPaced
    }

    fn presentation_delay(&self, stimulus: &Stimulus) -> Option<Duration> {
        let cells = match &stimulus.content {
            crate::stimulus::StimulusContent::Sequence { cells } => cells.len() as u64,
            _ => return None,
        };
        Some(Duration::from_millis(cells * self.memorize_ms_per_item))
    }

    fn on_start(&self, session: &mut Session) {
        session.set_var(TestKind::Corsi, "length", json!(self.start_length));
        session.set_var(TestKind::Corsi, "streak", json!(0));
        session.set_var(TestKind::Corsi, "errors", json!(0));
        session.set_var(TestKind::Corsi, "best", json!(0));
    }

    fn response_prompt(&self, _iteration: u32) -> Option<OutboundMessage> {
        Some(OutboundMessage::text(
            "Now repeat the sequence (digits, in order).",
        ))
    }

    fn evaluate(
        &self,
        iteration: u32,
        stimulus: &Stimulus,
        input: &ResponseInput,
        latency: Duration,
        session: &mut Session,
    ) -> Evaluation {
        let text = match input {
            ResponseInput::Text(t) => t,
            ResponseInput::Key(_) => return Evaluation::Ignored,
        };
        let response: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        if response.is_empty() {
            return Evaluation::Ignored;
        }

        let correct = response == stimulus.expected;
        // A streak > 0 entering here means this is a re-attempt of the same
        // length, so its record replaces the failed one.
        let retrying = Self::var(session, "streak") > 0;
        let length = Self::var(session, "length");

        if correct {
            session.set_var(TestKind::Corsi, "best", json!(length.max(Self::var(session, "best"))));
            session.set_var(TestKind::Corsi, "length", json!(length + 1));
            session.set_var(TestKind::Corsi, "streak", json!(0));
        } else {
            session.set_var(
                TestKind::Corsi,
                "streak",
                json!(Self::var(session, "streak") + 1),
            );
            session.set_var(
                TestKind::Corsi,
                "errors",
                json!(Self::var(session, "errors") + 1),
            );
        }

        let record = IterationRecord {
            iteration,
            correct,
            latency_ms: latency.as_millis() as u64,
            response,
            expected: stimulus.expected.clone(),
        };
        if retrying {
            Evaluation::Rescored(record)
        } else {
            Evaluation::Scored(record)
        }
    }

    fn feedback(&self, record: &IterationRecord) -> Option<String> {
        Some(if record.correct {
            "Correct!".to_string()
        } else {
            "Not quite. Same length, one more try.".to_string()
        })
    }

    fn decide(&self, _records: &[IterationRecord], session: &Session) -> Continuation {
        if Self::var(session, "length") > self.max_length as u64 {
            return Continuation::Finish(RunStatus::Completed);
        }
        if Self::var(session, "streak") >= self.error_limit as u64 {
            return Continuation::Finish(RunStatus::Completed);
        }
        Continuation::NextAfter(self.feedback_delay)
    }

    fn metrics(
        &self,
        _records: &[IterationRecord],
        session: &Session,
        _elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        TestMetrics::Corsi(CorsiMetrics {
            max_length: Self::var(session, "best") as u32,
            total_errors: Self::var(session, "errors") as u32,
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Corsi(m) => m,
            _ => return String::new(),
        };
        let mut text = format!(
            "Sequence memory finished: longest correct sequence {}, {} errors.",
            m.max_length, m.total_errors
        );
        if status == RunStatus::Interrupted {
            text.push_str(" The test was interrupted; partial results recorded.");
        }
        if !saved {
            text.push_str(" Warning: results may not have saved.");
        }
        text
    }
}
