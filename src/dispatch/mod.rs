//! Session registry and dispatcher.
//!
//! The dispatcher owns the map from chat to active run and is the only
//! place that creates [`Controller`]s. It enforces the one-active-test
//! invariant per chat, gates starts on a registered profile and on the
//! "overwrite existing results?" confirmation, and routes user actions to
//! whichever controller is live.
//!
//! Finished controllers stay in the map until the next operation on that
//! chat sweeps them out; they refuse further input on their own.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::battery::{
    Controller, ControllerCore, OutcomeReport, ResponseInput, TestCatalog, TestKind,
};
use crate::error::{AppResult, DispatchError};
use crate::session::{ChatId, Profile, SessionStore};
use crate::stimulus::StimulusProvider;
use crate::storage::{ResultRecord, ResultSink};
use crate::transport::ChatTransport;

/// What a start request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A controller is live and instructions have been sent.
    Started,
    /// The user already has saved results for this test; the caller should
    /// ask before retrying with `force`.
    NeedsOverwriteConfirm,
}

/// A user event addressed to the active run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// "Begin" pressed on the instructions screen.
    Acknowledge,
    /// An inline key or free-text message.
    Input(ResponseInput),
    /// Explicit stop request.
    Stop,
}

/// Routes chat events to per-chat controllers.
pub struct Dispatcher {
    catalog: TestCatalog,
    core: ControllerCore,
    store: SessionStore,
    sink: Arc<dyn ResultSink>,
    runs: Mutex<HashMap<ChatId, Arc<Controller>>>,
}

impl Dispatcher {
    /// Wire the dispatcher and return the outcome stream consumed by the
    /// menu shell.
    pub fn new(
        catalog: TestCatalog,
        store: SessionStore,
        provider: Arc<dyn StimulusProvider>,
        sink: Arc<dyn ResultSink>,
        transport: Arc<dyn ChatTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<OutcomeReport>) {
        let (outcomes, reports) = mpsc::unbounded_channel();
        let core = ControllerCore::new(
            store.clone(),
            provider,
            Arc::clone(&sink),
            transport,
            outcomes,
        );
        let dispatcher = Self {
            catalog,
            core,
            store,
            sink,
            runs: Mutex::new(HashMap::new()),
        };
        (dispatcher, reports)
    }

    /// Register (or re-register) the chat's profile and make sure its result
    /// row exists.
    pub async fn register(&self, chat_id: ChatId, profile: Profile) -> AppResult<()> {
        self.sink.ensure_row(&profile).await?;
        self.store.set_profile(chat_id, profile.clone()).await;
        info!(chat_id = %chat_id, unique_id = %profile.unique_id, "Profile registered");
        Ok(())
    }

    /// The chat's registered profile, if any.
    pub async fn profile(&self, chat_id: ChatId) -> Option<Profile> {
        self.store.get(chat_id).await.and_then(|s| s.profile)
    }

    /// The kind of the currently running test, if one is live.
    pub async fn active_test(&self, chat_id: ChatId) -> Option<TestKind> {
        let controller = self.live_controller(chat_id).await?;
        Some(controller.kind())
    }

    /// Start `kind` for this chat. `force` skips the overwrite confirmation
    /// after the user has agreed to replace saved results.
    pub async fn start_test(
        &self,
        chat_id: ChatId,
        kind: TestKind,
        force: bool,
    ) -> AppResult<StartOutcome> {
        if let Some(controller) = self.live_controller(chat_id).await {
            return Err(DispatchError::TestAlreadyActive {
                active: controller.kind(),
            }
            .into());
        }

        let profile = self
            .profile(chat_id)
            .await
            .ok_or(DispatchError::NoProfile)?;

        let entry = self
            .catalog
            .get(kind)
            .ok_or_else(|| DispatchError::UnknownTest {
                name: kind.to_string(),
            })?
            .clone();

        if !force && self.sink.has_prior_result(&profile.unique_id, kind).await? {
            debug!(chat_id = %chat_id, test = %kind, "Prior result found, asking to confirm");
            return Ok(StartOutcome::NeedsOverwriteConfirm);
        }

        let controller = Controller::new(
            self.core.clone(),
            Arc::clone(&entry.logic),
            entry.display_name,
            chat_id,
            profile,
        );
        controller.start().await;
        self.runs.lock().await.insert(chat_id, controller);
        Ok(StartOutcome::Started)
    }

    /// Route one user action to the chat's live controller.
    pub async fn dispatch(&self, chat_id: ChatId, action: UserAction) -> AppResult<()> {
        let controller = self
            .live_controller(chat_id)
            .await
            .ok_or(DispatchError::NoActiveTest)?;
        match action {
            UserAction::Acknowledge => controller.acknowledge().await,
            UserAction::Input(input) => controller.handle_input(input).await,
            UserAction::Stop => controller.request_stop().await,
        }
        Ok(())
    }

    /// Fetch the saved result row for `unique_id`.
    pub async fn fetch_record(&self, unique_id: &str) -> AppResult<Option<ResultRecord>> {
        Ok(self.sink.fetch_record(unique_id).await?)
    }

    /// Stop whatever is running, keep the profile. Returns whether a run was
    /// actually interrupted.
    pub async fn stop_active(&self, chat_id: ChatId) -> bool {
        match self.live_controller(chat_id).await {
            Some(controller) => {
                controller.request_stop().await;
                true
            }
            None => false,
        }
    }

    /// Full reset: interrupt any live run and forget the profile.
    pub async fn reset(&self, chat_id: ChatId) {
        self.stop_active(chat_id).await;
        self.runs.lock().await.remove(&chat_id);
        self.store.clear_profile(chat_id).await;
        info!(chat_id = %chat_id, "Chat reset");
    }

    /// The chat's controller if it has not finished; finished ones are
    /// swept out here.
    async fn live_controller(&self, chat_id: ChatId) -> Option<Arc<Controller>> {
        let controller = {
            let runs = self.runs.lock().await;
            runs.get(&chat_id).cloned()
        }?;
        if controller.is_done().await {
            self.runs.lock().await.remove(&chat_id);
            return None;
        }
        Some(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::RunStatus;
    use crate::config::BatteryConfig;
    use crate::error::AppError;
    use crate::stimulus::{CatalogProvider, ResourceCatalog};
    use crate::storage::memory::MemorySink;
    use crate::transport::memory::MemoryTransport;

    struct Harness {
        dispatcher: Dispatcher,
        reports: mpsc::UnboundedReceiver<OutcomeReport>,
        sink: Arc<MemorySink>,
        transport: Arc<MemoryTransport>,
    }

    fn harness() -> Harness {
        let config = BatteryConfig::default();
        let sink = Arc::new(MemorySink::new());
        let transport = Arc::new(MemoryTransport::new());
        let (dispatcher, reports) = Dispatcher::new(
            TestCatalog::standard(&config),
            SessionStore::new(),
            Arc::new(CatalogProvider::new(ResourceCatalog::builtin(), config.clone())),
            Arc::clone(&sink) as Arc<dyn ResultSink>,
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
        );
        Harness {
            dispatcher,
            reports,
            sink,
            transport,
        }
    }

    fn profile() -> Profile {
        Profile {
            unique_id: "u-1".to_string(),
            display_name: "Ada".to_string(),
            age: 36,
            external_user_id: 99,
        }
    }

    #[tokio::test]
    async fn test_start_without_profile_is_rejected() {
        let h = harness();
        let err = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::NoProfile)
        ));
    }

    #[tokio::test]
    async fn test_register_then_start_sends_instructions() {
        let h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        let outcome = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(h.dispatcher.active_test(ChatId(1)).await, Some(TestKind::Raven));
        assert_eq!(h.transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_first_is_live() {
        let h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        h.dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap();
        let err = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Stroop, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::TestAlreadyActive {
                active: TestKind::Raven
            })
        ));
    }

    #[tokio::test]
    async fn test_chats_run_independently() {
        let h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        let mut other = profile();
        other.unique_id = "u-2".to_string();
        h.dispatcher.register(ChatId(2), other).await.unwrap();

        h.dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap();
        let outcome = h
            .dispatcher
            .start_test(ChatId(2), TestKind::Stroop, false)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_prior_result_requires_confirmation_then_force_starts() {
        let h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();

        // Seed a saved reaction result for this user.
        use crate::storage::{ReactionMetrics, TestMetrics};
        h.sink
            .write_result(
                &profile(),
                &TestMetrics::Reaction(ReactionMetrics {
                    best_ms: Some(240),
                    attempts: 1,
                    succeeded: true,
                    interrupted: false,
                }),
            )
            .await
            .unwrap();

        let outcome = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Reaction, false)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::NeedsOverwriteConfirm);
        assert_eq!(h.dispatcher.active_test(ChatId(1)).await, None);

        let outcome = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Reaction, true)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_dispatch_without_active_test_is_rejected() {
        let h = harness();
        let err = h
            .dispatcher
            .dispatch(ChatId(1), UserAction::Acknowledge)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::NoActiveTest)
        ));
    }

    #[tokio::test]
    async fn test_stop_interrupts_and_sweeps_the_run() {
        let mut h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        h.dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap();
        assert!(h.dispatcher.stop_active(ChatId(1)).await);

        let report = h.reports.recv().await.expect("outcome report");
        assert_eq!(report.status, RunStatus::Interrupted);
        assert!(report.profile_active);
        assert_eq!(h.dispatcher.active_test(ChatId(1)).await, None);

        // Profile survives a stop, so a new start is allowed immediately.
        let outcome = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Rotation, false)
            .await
            .unwrap();
        assert_eq!(outcome, StartOutcome::Started);
    }

    #[tokio::test]
    async fn test_reset_clears_profile() {
        let h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        h.dispatcher.reset(ChatId(1)).await;
        assert_eq!(h.dispatcher.profile(ChatId(1)).await, None);
        let err = h
            .dispatcher
            .start_test(ChatId(1), TestKind::Corsi, false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Dispatch(DispatchError::NoProfile)
        ));
    }

    #[tokio::test]
    async fn test_full_matrices_run_routes_through_dispatcher() {
        let mut h = harness();
        h.dispatcher.register(ChatId(1), profile()).await.unwrap();
        h.dispatcher
            .start_test(ChatId(1), TestKind::Raven, false)
            .await
            .unwrap();
        h.dispatcher
            .dispatch(ChatId(1), UserAction::Acknowledge)
            .await
            .unwrap();

        // Self-paced test: ten answers end the run regardless of accuracy.
        for _ in 0..10 {
            h.dispatcher
                .dispatch(
                    ChatId(1),
                    UserAction::Input(ResponseInput::Key("1".to_string())),
                )
                .await
                .unwrap();
        }

        let report = h.reports.recv().await.expect("outcome report");
        assert_eq!(report.kind, TestKind::Raven);
        assert_eq!(report.status, RunStatus::Completed);
        assert!(report.saved);
        assert_eq!(h.sink.write_count(), 1);
    }
}
