//! Stroop interference.
//!
//! Three parts with a fixed iteration count each; every response advances.
//! The interesting output is per-part time, computed from the per-iteration
//! latencies, plus the total error count.

use std::time::Duration;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::Stimulus;
use crate::storage::{StroopMetrics, TestMetrics};

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy,
};

/// Stroop lifecycle policy.
pub struct StroopLogic {
    parts: u32,
    iterations_per_part: u32,
}

impl StroopLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            parts: config.stroop.parts,
            iterations_per_part: config.stroop.iterations_per_part,
        }
    }

    fn total_iterations(&self) -> u32 {
        self.parts * self.iterations_per_part
    }

    /// Sum of latencies for `part` (1-based), over however many records the
    /// run produced.
    fn part_ms(&self, records: &[IterationRecord], part: u32) -> u64 {
        let from = ((part - 1) * self.iterations_per_part) as usize;
        let to = (part * self.iterations_per_part) as usize;
        records
            .iter()
            .skip(from)
            .take(to - from)
            .map(|r| r.latency_ms)
            .sum()
    }
}

impl TestLogic for StroopLogic {
    fn kind(&self) -> TestKind {
        TestKind::Stroop
    }

    fn instructions(&self) -> String {
        format!(
            "Stroop test. A color word appears printed in some ink color; always \
             answer with the INK color, not the word. {} parts of {} items each; \
             answer as fast as you can.",
            self.parts, self.iterations_per_part
        )
    }

    fn timeout(&self, _iteration: u32) -> TimeoutPolicy {
        TimeoutPolicy::SelfPaced
    }

    fn evaluate(
        &self,
        iteration: u32,
        stimulus: &Stimulus,
        input: &ResponseInput,
        latency: Duration,
        _session: &mut Session,
    ) -> Evaluation {
        let response = match input {
            ResponseInput::Key(k) => k.clone(),
            ResponseInput::Text(_) => return Evaluation::Ignored,
        };
        Evaluation::Scored(IterationRecord {
            iteration,
            correct: response == stimulus.expected,
            latency_ms: latency.as_millis() as u64,
            response,
            expected: stimulus.expected.clone(),
        })
    }

    fn decide(&self, records: &[IterationRecord], _session: &Session) -> Continuation {
        if records.len() as u32 >= self.total_iterations() {
            Continuation::Finish(RunStatus::Completed)
        } else {
            Continuation::Next
        }
    }

    fn metrics(
        &self,
        records: &[IterationRecord],
        _session: &Session,
        _elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        TestMetrics::Stroop(StroopMetrics {
            part1_ms: self.part_ms(records, 1),
            part2_ms: self.part_ms(records, 2),
            part3_ms: self.part_ms(records, 3),
            errors: records.iter().filter(|r| !r.correct).count() as u32,
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Stroop(m) => m,
            _ => return String::new(),
        };
        let mut text = format!(
            "Stroop finished: parts {:.1}s / {:.1}s / {:.1}s, {} errors.",
            m.part1_ms as f64 / 1000.0,
            m.part2_ms as f64 / 1000.0,
            m.part3_ms as f64 / 1000.0,
            m.errors
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
