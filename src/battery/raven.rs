//! Progressive matrices.
//!
//! Self-paced multiple choice over a pool of matrix tasks drawn without
//! replacement. No feedback between iterations. The run ends at the
//! configured iteration count, or earlier if the task pool runs out.

use std::time::Duration;

use crate::config::BatteryConfig;
use crate::session::Session;
use crate::stimulus::Stimulus;
use crate::storage::{RavenMetrics, TestMetrics};

use super::{
    Continuation, Evaluation, IterationRecord, ResponseInput, RunStatus, TestKind, TestLogic,
    TimeoutPolicy,
};

/// Progressive-matrices lifecycle policy.
pub struct RavenLogic {
    iterations: u32,
}

impl RavenLogic {
    pub fn new(config: &BatteryConfig) -> Self {
        Self {
            iterations: config.raven.iterations,
        }
    }

    fn pool_exhausted(session: &Session) -> bool {
        session
            .get_var(TestKind::Raven, "exhausted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

impl TestLogic for RavenLogic {
    fn kind(&self) -> TestKind {
        TestKind::Raven
    }

    fn instructions(&self) -> String {
        format!(
            "Progressive matrices. Each task shows a pattern with one piece \
             missing; pick the option that completes it. Up to {} tasks, no \
             time limit, no feedback until the end.",
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

    fn decide(&self, records: &[IterationRecord], session: &Session) -> Continuation {
        if records.len() as u32 >= self.iterations || Self::pool_exhausted(session) {
            Continuation::Finish(RunStatus::Completed)
        } else {
            Continuation::Next
        }
    }

    fn metrics(
        &self,
        records: &[IterationRecord],
        _session: &Session,
        elapsed: Duration,
        interrupted: bool,
    ) -> TestMetrics {
        TestMetrics::Raven(RavenMetrics {
            correct: records.iter().filter(|r| r.correct).count() as u32,
            total: records.len() as u32,
            elapsed_ms: elapsed.as_millis() as u64,
            interrupted,
        })
    }

    fn summary(&self, metrics: &TestMetrics, status: RunStatus, saved: bool) -> String {
        let m = match metrics {
            TestMetrics::Raven(m) => m,
            _ => return String::new(),
        };
        let mut text = format!(
            "Progressive matrices: {}/{} correct in {}s.",
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
