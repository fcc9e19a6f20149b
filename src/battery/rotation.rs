//! Mental rotation.
//!
//! Self-paced multiple choice: each iteration shows a reference figure and a
//! set of candidates, one of which is the reference rotated in the plane.
//! Brief right/wrong feedback separates iterations. The run ends after a
//! fixed number of figures.

use std::time::Duration;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::Stimulus;
use crate::storage::{RotationMetrics, TestMetrics};

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy,
};

/// Mental-rotation lifecycle policy.
pub struct RotationLogic {
    iterations: u32,
    feedback_delay: Duration,
}

impl RotationLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            iterations: config.rotation.iterations,
            feedback_delay: Duration::from_millis(config.feedback_delay_ms),
        }
    }
}

impl TestLogic for RotationLogic {
    fn kind(&self) -> TestKind {
        TestKind::Rotation
    }

    fn instructions(&self) -> String {
        format!(
            "Mental rotation. For each figure, pick the option that shows the \
             same figure rotated, not mirrored. There are {} figures and no \
             time limit.",
            self.iterations
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
        let key = match input {
            ResponseInput::Key(key) => key,
            ResponseInput::Text(_) => return Evaluation::Ignored,
        };
        Evaluation::Scored(IterationRecord {
            iteration,
            correct: key == &stimulus.expected,
            latency_ms: latency.as_millis() as u64,
            response: key.clone(),
            expected: stimulus.expected.clone(),
        })
    }

    fn feedback(&self, record: &IterationRecord) -> Option<String> {
        Some(if record.correct {
            "Correct!".to_string()
        } else {
            "Not quite.".to_string()
        })
    }

    fn decide(&self, records: &[IterationRecord], _session: &Session) -> Continuation {
        if records.len() as u32 >= self.iterations {
            Continuation::Finish(RunStatus::Completed)
        } else {
            Continuation::NextAfter(self.feedback_delay)
        }
    }

    fn metrics(
        &self,
        records: &[IterationRecord],
        _session: &Session,
        elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        TestMetrics::Rotation(RotationMetrics {
            correct: records.iter().filter(|r| r.correct).count() as u32,
            total: records.len() as u32,
            elapsed_ms: elapsed.as_millis() as u64,
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Rotation(m) => m,
            _ => return String::new(),
        };
        let mut text = format!(
            "Mental rotation: {}/{} correct in {}s.",
            m.correct,
            m.total,
            m.elapsed_ms / 1000
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
