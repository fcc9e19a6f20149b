//! Verbal fluency.
//!
//! One iteration for the whole run: a category is announced and a countdown
//! starts. Every free-text message the user sends is tokenized and the
//! distinct words accumulate in session variables until the countdown
//! expires. There is no per-word scoring; the count of distinct words is the
//! result.

use std::time::Duration;

use serde_json::json;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::Stimulus;
use crate::storage::{FluencyMetrics, TestMetrics};

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy,
};

const VAR_WORDS: &str = "words";

/// Verbal-fluency lifecycle policy.
pub struct FluencyLogic {
    duration: Duration,
    tick: Duration,
}

impl FluencyLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            duration: Duration::from_secs(config.fluency.duration_secs),
            tick: Duration::from_secs(config.fluency.tick_secs),
        }
    }

    fn stored_words(session: &Session) -> Vec<String> {
        session
            .get_var(TestKind::Fluency, VAR_WORDS)
            .and_then(|v| v.as_array().cloned())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lowercased alphabetic tokens of two or more characters. Punctuation
    /// splits words; single letters and numbers are noise, not answers.
    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphabetic())
            .filter(|w| w.chars().count() >= 2)
            .map(|w| w.to_lowercase())
            .collect()
    }
}

impl TestLogic for FluencyLogic {
    fn kind(&self) -> TestKind {
        TestKind::Fluency
    }

    fn instructions(&self) -> String {
        format!(
            "Verbal fluency. You will be given a category and {} seconds. \
             Type as many distinct words from that category as you can, in \
             any number of messages. Repeats do not count.",
            self.duration.as_secs()
        )
    }

    fn timeout(&self, _iteration: u32) -> TimeoutPolicy {
        TimeoutPolicy::Countdown {
            total: self.duration,
            tick: self.tick,
        }
    }

    fn evaluate(
        &self,
        _iteration: u32,
        _stimulus: &Stimulus,
        input: &ResponseInput,
        _latency: Duration,
        session: &mut Session,
    ) -> Evaluation {
        let text = match input {
            ResponseInput::Text(text) => text,
            ResponseInput::Key(_) => return Evaluation::Ignored,
        };
        let mut words = Self::stored_words(session);
        for word in Self::tokenize(text) {
            if !words.contains(&word) {
                words.push(word);
            }
        }
        session.set_var(TestKind::Fluency, VAR_WORDS, json!(words));
        Evaluation::Accumulated
    }

    // Responses accumulate until the countdown expires; there is no scored
    // iteration to continue from.
    fn decide(&self, _records: &[IterationRecord], _session: &Session) -> Continuation {
        Continuation::Finish(RunStatus::Completed)
    }

    fn metrics(
        &self,
        _records: &[IterationRecord],
        session: &Session,
        _elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        let words = Self::stored_words(session);
        TestMetrics::Fluency(FluencyMetrics {
            word_count: words.len() as u32,
            words,
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Fluency(m) => m,
            _ => return String::new(),
        };
        let mut text = format!("Verbal fluency: {} distinct words.", m.word_count);
        if status == RunStatus::Interrupted {
            text.push_str(" The test was interrupted; partial results recorded.");
        }
        if !saved {
            text.push_str(" Warning: results may not have saved.");
        }
        text
    }
}
