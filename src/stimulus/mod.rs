//! Stimulus Provider: supplies the next prompt for a test iteration.
//!
//! The provider contract is deterministic (same call, one stimulus plus its
//! expected answer) while the content itself is randomized. All fixed pools
//! live in the [`ResourceCatalog`], built once at startup and never mutated;
//! per-session consumption state ("already used" task ids, the current Corsi
//! length) lives in session variables.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

use crate::battery::TestKind;
use crate::config::BatteryConfig;
use crate::error::{StimulusError, StimulusResult};
use crate::session::Session;

/// Content of one stimulus, by test family.
#[derive(Debug, Clone, PartialEq)]
pub enum StimulusContent {
    /// Corsi: ordered cells (1-9) to memorize and repeat.
    Sequence { cells: Vec<u8> },
    /// Stroop: a color word printed in an ink color; answer by ink.
    ColorWord {
        word: String,
        ink: String,
        options: Vec<String>,
    },
    /// Reaction: a pre-target waiting screen; the target appears after
    /// `delay_ms`.
    ReactionCue { delay_ms: u64 },
    /// Fluency: the category to enumerate.
    Category { name: String },
    /// Mental rotation: reference figure and candidate rotations.
    RotatedFigure {
        figure_id: String,
        options: Vec<String>,
    },
    /// Raven: a matrix task with answer options.
    Matrix {
        task_id: String,
        options: Vec<String>,
    },
}

/// One stimulus and the answer the evaluator will compare against.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    pub content: StimulusContent,
    /// Expected answer, normalized (button payload or lowercase text).
    pub expected: String,
}

impl Stimulus {
    /// Human-facing prompt text for this stimulus.
    pub fn prompt_text(&self) -> String {
        match &self.content {
            StimulusContent::Sequence { cells } => {
                let shown: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
                format!("Memorize this sequence:\n{}", shown.join(" "))
            }
            StimulusContent::ColorWord { word, ink, .. } => {
                format!("{} (ink: {})\nPick the INK color.", word.to_uppercase(), ink)
            }
            StimulusContent::ReactionCue { .. } => "Wait for the green circle...".to_string(),
            StimulusContent::Category { name } => {
                format!("Name as many {} as you can. Go!", name)
            }
            StimulusContent::RotatedFigure { figure_id, .. } => {
                format!("Which option matches figure {} rotated?", figure_id)
            }
            StimulusContent::Matrix { task_id, .. } => {
                format!("Matrix {}: pick the missing piece.", task_id)
            }
        }
    }

    /// Inline keyboard rows for this stimulus, empty for free-text tests.
    pub fn keyboard(&self) -> Vec<Vec<String>> {
        match &self.content {
            StimulusContent::ColorWord { options, .. }
            | StimulusContent::RotatedFigure { options, .. }
            | StimulusContent::Matrix { options, .. } => vec![options.clone()],
            StimulusContent::Sequence { .. }
            | StimulusContent::ReactionCue { .. }
            | StimulusContent::Category { .. } => Vec::new(),
        }
    }
}

/// Supplies the next stimulus for a given test and iteration.
pub trait StimulusProvider: Send + Sync {
    /// Produce the stimulus for `iteration`, reading and updating per-session
    /// consumption state in `session`.
    fn next_stimulus(
        &self,
        kind: TestKind,
        iteration: u32,
        session: &mut Session,
    ) -> StimulusResult<Stimulus>;
}

/// A mental-rotation task: one figure, fixed options, one answer.
#[derive(Debug, Clone)]
pub struct RotationFigure {
    pub id: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// A Raven matrix task drawn without replacement.
#[derive(Debug, Clone)]
pub struct RavenTask {
    pub id: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// Immutable pools backing the standard battery.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    pub stroop_colors: Vec<String>,
    pub fluency_categories: Vec<String>,
    pub rotation_figures: Vec<RotationFigure>,
    pub raven_tasks: Vec<RavenTask>,
}

impl ResourceCatalog {
    /// The built-in pools. A deployment with its own image sets swaps this
    /// for a catalog loaded at startup; the provider does not care.
    pub fn builtin() -> Self {
        let options: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        Self {
            stroop_colors: ["red", "green", "blue", "yellow"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fluency_categories: ["animals", "fruits", "professions", "cities"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rotation_figures: (1..=20)
                .map(|i| RotationFigure {
                    id: format!("fig-{:02}", i),
                    options: options.clone(),
                    answer: options[i % options.len()].clone(),
                })
                .collect(),
            raven_tasks: (1..=24)
                .map(|i| RavenTask {
                    id: format!("matrix-{:02}", i),
                    options: options.clone(),
                    answer: options[(i * 3) % options.len()].clone(),
                })
                .collect(),
        }
    }
}

/// Catalog-backed provider used by the standard battery.
pub struct CatalogProvider {
    catalog: ResourceCatalog,
    config: BatteryConfig,
}

impl CatalogProvider {
    pub fn new(catalog: ResourceCatalog, config: BatteryConfig) -> Self {
        Self { catalog, config }
    }

    fn corsi_sequence(&self, session: &Session) -> Stimulus {
        let length = session
            .get_var(TestKind::Corsi, "length")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.config.corsi.start_length as u64) as usize;

        let mut rng = rand::thread_rng();
        let mut cells: Vec<u8> = Vec::with_capacity(length);
        while cells.len() < length {
            let cell = rng.gen_range(1..=9u8);
            // No immediate repeats; repeats further apart are fine.
            if cells.last() != Some(&cell) {
                cells.push(cell);
            }
        }
        let expected: String = cells.iter().map(|c| c.to_string()).collect();
        Stimulus {
            content: StimulusContent::Sequence { cells },
            expected,
        }
    }

    fn stroop_item(&self, iteration: u32) -> Stimulus {
        let colors = &self.catalog.stroop_colors;
        let mut rng = rand::thread_rng();
        let word = colors.choose(&mut rng).cloned().unwrap_or_default();
        let part = (iteration - 1) / self.config.stroop.iterations_per_part + 1;
        // Part 1 is congruent; parts 2 and 3 force interference.
        let ink = if part == 1 {
            word.clone()
        } else {
            colors
                .iter()
                .filter(|c| **c != word)
                .cloned()
                .collect::<Vec<_>>()
                .choose(&mut rng)
                .cloned()
                .unwrap_or_else(|| word.clone())
        };
        Stimulus {
            expected: ink.clone(),
            content: StimulusContent::ColorWord {
                word,
                ink,
                options: colors.clone(),
            },
        }
    }

    fn reaction_cue(&self) -> Stimulus {
        let mut rng = rand::thread_rng();
        let delay_ms =
            rng.gen_range(self.config.reaction.min_delay_ms..=self.config.reaction.max_delay_ms);
        Stimulus {
            content: StimulusContent::ReactionCue { delay_ms },
            expected: "press".to_string(),
        }
    }

    fn fluency_category(&self, kind: TestKind, session: &mut Session) -> Stimulus {
        // The category is fixed for the whole run; pick it once.
        let name = match session.get_var(kind, "category").and_then(|v| v.as_str()) {
            Some(existing) => existing.to_string(),
            None => {
                let mut rng = rand::thread_rng();
                let picked = self
                    .catalog
                    .fluency_categories
                    .choose(&mut rng)
                    .cloned()
                    .unwrap_or_else(|| "animals".to_string());
                session.set_var(kind, "category", json!(picked));
                picked
            }
        };
        Stimulus {
            content: StimulusContent::Category { name },
            expected: String::new(),
        }
    }

    /// Draw an unused entry id from `pool`, tracking consumption in the
    /// session. Returns `None` when the pool is exhausted.
    fn draw_unused<'a, T>(
        &self,
        pool: &'a [T],
        id_of: impl Fn(&T) -> &str,
        kind: TestKind,
        session: &mut Session,
    ) -> Option<&'a T> {
        let used: Vec<String> = session
            .get_var(kind, "used")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let remaining: Vec<&T> = pool
            .iter()
            .filter(|t| !used.iter().any(|u| u == id_of(t)))
            .collect();
        let mut rng = rand::thread_rng();
        let picked = remaining.choose(&mut rng).copied()?;
        let mut used = used;
        used.push(id_of(picked).to_string());
        // A fixed-count run normally ends before the pool empties; the flag
        // lets the continuation policy stop early when it does not.
        session.set_var(kind, "exhausted", json!(used.len() >= pool.len()));
        session.set_var(kind, "used", json!(used));
        Some(picked)
    }
}

impl StimulusProvider for CatalogProvider {
    fn next_stimulus(
        &self,
        kind: TestKind,
        iteration: u32,
        session: &mut Session,
    ) -> StimulusResult<Stimulus> {
        match kind {
            TestKind::Corsi => Ok(self.corsi_sequence(session)),
            TestKind::Stroop => Ok(self.stroop_item(iteration)),
            TestKind::Reaction => Ok(self.reaction_cue()),
            TestKind::Fluency => Ok(self.fluency_category(kind, session)),
            TestKind::Rotation => self
                .draw_unused(&self.catalog.rotation_figures, |f| &f.id, kind, session)
                .map(|figure| Stimulus {
                    expected: figure.answer.clone(),
                    content: StimulusContent::RotatedFigure {
                        figure_id: figure.id.clone(),
                        options: figure.options.clone(),
                    },
                })
                .ok_or(StimulusError::NoContent { kind, iteration }),
            TestKind::Raven => self
                .draw_unused(&self.catalog.raven_tasks, |t| &t.id, kind, session)
                .map(|task| Stimulus {
                    expected: task.answer.clone(),
                    content: StimulusContent::Matrix {
                        task_id: task.id.clone(),
                        options: task.options.clone(),
                    },
                })
                .ok_or(StimulusError::NoContent { kind, iteration }),
        }
    }
}
