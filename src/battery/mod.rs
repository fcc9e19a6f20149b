//! The six cognitive tests and their shared lifecycle skeleton.
//!
//! This module provides:
//! - [`TestKind`]: the closed set of test identities
//! - [`Controller`]: the shared state machine every test runs on (`core.rs`)
//! - [`TestLogic`]: the per-test variation point (stimulus policy,
//!   evaluation, continuation, metrics)
//! - [`TestCatalog`]: the static registration table built at startup and
//!   injected into the dispatcher
//!
//! The six concrete tests are thin [`TestLogic`] implementations; all timer
//! handling, interruption routing and persistence lives in the shared
//! controller.

mod core;
mod corsi;
mod fluency;
mod raven;
mod reaction;
mod rotation;
mod stroop;

pub use self::core::*;
pub use corsi::*;
pub use fluency::*;
pub use raven::*;
pub use reaction::*;
pub use rotation::*;
pub use stroop::*;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BatteryConfig;

/// The six test identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    /// Sequence memory (Corsi block-tapping).
    Corsi,
    /// Stroop interference.
    Stroop,
    /// Simple reaction time.
    Reaction,
    /// Verbal fluency.
    Fluency,
    /// Mental rotation.
    Rotation,
    /// Progressive matrices (Raven).
    Raven,
}

impl TestKind {
    /// All kinds, in menu order.
    pub const ALL: [TestKind; 6] = [
        TestKind::Corsi,
        TestKind::Stroop,
        TestKind::Reaction,
        TestKind::Fluency,
        TestKind::Rotation,
        TestKind::Raven,
    ];

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Corsi => "corsi",
            TestKind::Stroop => "stroop",
            TestKind::Reaction => "reaction",
            TestKind::Fluency => "fluency",
            TestKind::Rotation => "rotation",
            TestKind::Raven => "raven",
        }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "corsi" => Ok(TestKind::Corsi),
            "stroop" => Ok(TestKind::Stroop),
            "reaction" => Ok(TestKind::Reaction),
            "fluency" => Ok(TestKind::Fluency),
            "rotation" => Ok(TestKind::Rotation),
            "raven" | "matrices" => Ok(TestKind::Raven),
            _ => Err(format!("Unknown test: {}", s)),
        }
    }
}

/// One registration table entry.
#[derive(Clone)]
pub struct CatalogEntry {
    /// Human-facing test name used in menus and summaries.
    pub display_name: &'static str,
    /// The test's lifecycle policy.
    pub logic: Arc<dyn TestLogic>,
}

/// Static registration table mapping each test kind to its display name and
/// logic. Built once at startup and injected into the dispatcher, never
/// mutated afterwards.
#[derive(Clone, Default)]
pub struct TestCatalog {
    entries: HashMap<TestKind, CatalogEntry>,
}

impl TestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one test. Later registrations for the same kind replace
    /// earlier ones.
    pub fn register(&mut self, display_name: &'static str, logic: Arc<dyn TestLogic>) {
        self.entries.insert(logic.kind(), CatalogEntry { display_name, logic });
    }

    /// The full standard battery, parameterized by config.
    pub fn standard(config: &BatteryConfig) -> Self {
        let mut catalog = Self::new();
        catalog.register("Sequence memory", Arc::new(CorsiLogic::new(config)));
        catalog.register("Stroop interference", Arc::new(StroopLogic::new(config)));
        catalog.register("Reaction time", Arc::new(ReactionLogic::new(config)));
        catalog.register("Verbal fluency", Arc::new(FluencyLogic::new(config)));
        catalog.register("Mental rotation", Arc::new(RotationLogic::new(config)));
        catalog.register("Progressive matrices", Arc::new(RavenLogic::new(config)));
        catalog
    }

    pub fn get(&self, kind: TestKind) -> Option<&CatalogEntry> {
        self.entries.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
