//! In-memory Result Sink used by integration tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::battery::TestKind;
use crate::error::{SinkError, SinkResult};
use crate::session::Profile;

use super::{ResultRecord, ResultSink, TestMetrics};

/// Map-backed sink. `fail_writes(true)` makes `write_result` fail, which is
/// how tests exercise the persistence-failure path of Finishing.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<HashMap<String, ResultRecord>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle write failures.
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful `write_result` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Direct row access for assertions.
    pub fn row(&self, unique_id: &str) -> Option<ResultRecord> {
        self.rows.lock().expect("sink rows lock").get(unique_id).cloned()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn has_prior_result(&self, unique_id: &str, kind: TestKind) -> SinkResult<bool> {
        Ok(self
            .row(unique_id)
            .map(|r| r.has_result(kind))
            .unwrap_or(false))
    }

    async fn write_result(&self, profile: &Profile, metrics: &TestMetrics) -> SinkResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Query {
                message: "sink set to fail".to_string(),
            });
        }
        let mut rows = self.rows.lock().expect("sink rows lock");
        let record = rows
            .entry(profile.unique_id.clone())
            .or_insert_with(|| ResultRecord::new(profile));
        record.apply(metrics);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ensure_row(&self, profile: &Profile) -> SinkResult<()> {
        let mut rows = self.rows.lock().expect("sink rows lock");
        let record = rows
            .entry(profile.unique_id.clone())
            .or_insert_with(|| ResultRecord::new(profile));
        record.display_name = profile.display_name.clone();
        record.age = profile.age;
        record.external_user_id = profile.external_user_id;
        Ok(())
    }

    async fn fetch_record(&self, unique_id: &str) -> SinkResult<Option<ResultRecord>> {
        Ok(self.row(unique_id))
    }
}
