//! Result Sink: persistent per-user tabular result store.
//!
//! One row per `unique_id`. Identity columns are filled from the profile
//! snapshot on first write; each test owns a fixed group of metric columns
//! which a finished run overwrites in place, leaving every other test's
//! columns untouched.

pub mod memory;
mod sqlite;

pub use memory::MemorySink;
pub use sqlite::SqliteResultSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::battery::TestKind;
use crate::error::SinkResult;
use crate::session::Profile;

/// Sequence-memory metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsiMetrics {
    /// Longest sequence answered correctly.
    pub max_length: u32,
    pub total_errors: u32,
    pub interrupted: bool,
}

/// Stroop metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StroopMetrics {
    pub part1_ms: u64,
    pub part2_ms: u64,
    pub part3_ms: u64,
    pub errors: u32,
    pub interrupted: bool,
}

/// Reaction-time metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionMetrics {
    /// Corrected latency of the successful attempt, if any.
    pub best_ms: Option<u64>,
    pub attempts: u32,
    pub succeeded: bool,
    pub interrupted: bool,
}

/// Verbal-fluency metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FluencyMetrics {
    pub word_count: u32,
    pub words: Vec<String>,
    pub interrupted: bool,
}

/// Mental-rotation metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationMetrics {
    pub correct: u32,
    pub total: u32,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

/// Progressive-matrices metric fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RavenMetrics {
    pub correct: u32,
    pub total: u32,
    pub elapsed_ms: u64,
    pub interrupted: bool,
}

/// The metric fields of one finished (or interrupted) run, tagged by test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum TestMetrics {
    Corsi(CorsiMetrics),
    Stroop(StroopMetrics),
    Reaction(ReactionMetrics),
    Fluency(FluencyMetrics),
    Rotation(RotationMetrics),
    Raven(RavenMetrics),
}

impl TestMetrics {
    /// Which test these metrics belong to.
    pub fn kind(&self) -> TestKind {
        match self {
            TestMetrics::Corsi(_) => TestKind::Corsi,
            TestMetrics::Stroop(_) => TestKind::Stroop,
            TestMetrics::Reaction(_) => TestKind::Reaction,
            TestMetrics::Fluency(_) => TestKind::Fluency,
            TestMetrics::Rotation(_) => TestKind::Rotation,
            TestMetrics::Raven(_) => TestKind::Raven,
        }
    }

    /// Whether the run ended by interruption or error.
    pub fn interrupted(&self) -> bool {
        match self {
            TestMetrics::Corsi(m) => m.interrupted,
            TestMetrics::Stroop(m) => m.interrupted,
            TestMetrics::Reaction(m) => m.interrupted,
            TestMetrics::Fluency(m) => m.interrupted,
            TestMetrics::Rotation(m) => m.interrupted,
            TestMetrics::Raven(m) => m.interrupted,
        }
    }
}

/// One user's result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub unique_id: String,
    pub display_name: String,
    pub age: u32,
    pub external_user_id: i64,
    pub updated_at: DateTime<Utc>,
    pub corsi: Option<CorsiMetrics>,
    pub stroop: Option<StroopMetrics>,
    pub reaction: Option<ReactionMetrics>,
    pub fluency: Option<FluencyMetrics>,
    pub rotation: Option<RotationMetrics>,
    pub raven: Option<RavenMetrics>,
}

impl ResultRecord {
    /// A fresh row carrying only identity fields.
    pub fn new(profile: &Profile) -> Self {
        Self {
            unique_id: profile.unique_id.clone(),
            display_name: profile.display_name.clone(),
            age: profile.age,
            external_user_id: profile.external_user_id,
            updated_at: Utc::now(),
            corsi: None,
            stroop: None,
            reaction: None,
            fluency: None,
            rotation: None,
            raven: None,
        }
    }

    /// Whether `kind` has been attempted at least once.
    pub fn has_result(&self, kind: TestKind) -> bool {
        match kind {
            TestKind::Corsi => self.corsi.is_some(),
            TestKind::Stroop => self.stroop.is_some(),
            TestKind::Reaction => self.reaction.is_some(),
            TestKind::Fluency => self.fluency.is_some(),
            TestKind::Rotation => self.rotation.is_some(),
            TestKind::Raven => self.raven.is_some(),
        }
    }

    /// Overwrite the field group belonging to `metrics`' test.
    pub fn apply(&mut self, metrics: &TestMetrics) {
        match metrics {
            TestMetrics::Corsi(m) => self.corsi = Some(m.clone()),
            TestMetrics::Stroop(m) => self.stroop = Some(m.clone()),
            TestMetrics::Reaction(m) => self.reaction = Some(m.clone()),
            TestMetrics::Fluency(m) => self.fluency = Some(m.clone()),
            TestMetrics::Rotation(m) => self.rotation = Some(m.clone()),
            TestMetrics::Raven(m) => self.raven = Some(m.clone()),
        }
        self.updated_at = Utc::now();
    }
}

/// Persistent per-user result store.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Whether `unique_id` already has results for `kind` (drives the
    /// "overwrite existing results?" prompt).
    async fn has_prior_result(&self, unique_id: &str, kind: TestKind) -> SinkResult<bool>;

    /// Upsert one row: created from `profile` if absent, and only the
    /// column group belonging to `metrics`' test is overwritten.
    async fn write_result(&self, profile: &Profile, metrics: &TestMetrics) -> SinkResult<()>;

    /// Create or refresh the identity columns for `profile` without touching
    /// any test columns. Called on registration.
    async fn ensure_row(&self, profile: &Profile) -> SinkResult<()>;

    /// Fetch the full row for `unique_id`, if present.
    async fn fetch_record(&self, unique_id: &str) -> SinkResult<Option<ResultRecord>>;
}
