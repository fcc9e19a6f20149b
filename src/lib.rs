//! # Cognitive Battery
//!
//! A chat-driven cognitive test battery engine. Six tests (sequence memory,
//! Stroop interference, reaction time, verbal fluency, mental rotation and
//! progressive matrices) run on one shared session-lifecycle state machine,
//! with per-test logic plugged in at a single trait seam.
//!
//! ## Architecture
//!
//! ```text
//! Chat events → Dispatcher → Controller (per chat, per run)
//!                                 ↓ TestLogic (per test)
//!                           Stimulus Provider
//!                           SQLite (results)
//! ```
//!
//! A run walks start → present → collect → evaluate → repeat-or-finish.
//! Every deferred callback carries the epoch of the phase that scheduled
//! it, so late timers from an abandoned phase are ignored rather than
//! corrupting the current one. Finishing is idempotent and persists,
//! cleans up and notifies as independent best-effort steps.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use cognitive_battery::{Config, Dispatcher, TestCatalog};
//! use cognitive_battery::session::SessionStore;
//! use cognitive_battery::stimulus::{CatalogProvider, ResourceCatalog};
//! use cognitive_battery::storage::SqliteResultSink;
//! use cognitive_battery::transport::ConsoleTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let sink = SqliteResultSink::new(&config.database).await?;
//!     let provider = CatalogProvider::new(ResourceCatalog::builtin(), config.battery.clone());
//!     let (dispatcher, reports) = Dispatcher::new(
//!         TestCatalog::standard(&config.battery),
//!         SessionStore::new(),
//!         Arc::new(provider),
//!         Arc::new(sink),
//!         Arc::new(ConsoleTransport::new()),
//!     );
//!     // drive dispatcher from chat events, drain `reports` for summaries
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// The six tests, their shared controller and the registration catalog.
pub mod battery;
/// Configuration management.
pub mod config;
/// Error types and result aliases for each layer.
pub mod error;
/// Session registry and action routing.
pub mod dispatch;
/// Per-chat working state and the session store.
pub mod session;
/// Stimulus generation and the built-in resource catalog.
pub mod stimulus;
/// Result sink implementations over SQLite and memory.
pub mod storage;
/// Chat transport seam.
pub mod transport;

pub use battery::{TestCatalog, TestKind};
pub use config::Config;
pub use dispatch::{Dispatcher, StartOutcome, UserAction};
pub use error::{AppError, AppResult};
