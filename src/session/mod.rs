//! Per-chat conversation state.
//!
//! A [`Session`] holds everything the engine knows about one chat: the
//! registered profile, the tagged phase of the currently running test (if
//! any), and a namespaced map of per-test working variables. The
//! [`SessionStore`] is the single shared mutable resource per chat; all
//! access goes through its async lock, so controllers never observe a
//! half-written session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::battery::TestKind;

/// Chat identity, as issued by the surrounding transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered user profile. Set on login, cleared only by logout/reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// User-supplied unique identifier, the Result Sink row key.
    pub unique_id: String,
    pub display_name: String,
    pub age: u32,
    /// Identity of the user on the transport side.
    pub external_user_id: i64,
}

/// Generic lifecycle state shared by all six tests.
///
/// Concrete tests keep this exact shape; the variation between tests lives
/// in their continuation policies, not in extra states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    /// Instructions shown, waiting for acknowledgement.
    Instructions,
    /// Stimulus on screen, possibly inside a memorization delay.
    Presenting,
    /// Waiting for a qualifying user action or a timeout.
    AwaitingResponse,
    /// Waiting for the user to confirm a retry (reaction test).
    ConfirmRetry,
    /// Terminal bookkeeping in progress.
    Finishing,
}

/// The one active state-machine tag per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivePhase {
    pub kind: TestKind,
    pub state: PhaseState,
}

/// Conversation state for one chat.
#[derive(Debug, Clone)]
pub struct Session {
    pub chat_id: ChatId,
    pub profile: Option<Profile>,
    /// `None` means no test is running; at most one phase is ever set.
    pub phase: Option<ActivePhase>,
    /// Working variables, keys namespaced `"<kind>.<name>"`.
    variables: HashMap<String, Value>,
}

impl Session {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            profile: None,
            phase: None,
            variables: HashMap::new(),
        }
    }

    fn namespaced(kind: TestKind, key: &str) -> String {
        format!("{}.{}", kind, key)
    }

    /// Read one test-namespaced variable.
    pub fn get_var(&self, kind: TestKind, key: &str) -> Option<&Value> {
        self.variables.get(&Self::namespaced(kind, key))
    }

    /// Write one test-namespaced variable.
    pub fn set_var(&mut self, kind: TestKind, key: &str, value: Value) {
        self.variables.insert(Self::namespaced(kind, key), value);
    }

    /// Remove every variable belonging to `kind`. Profile keys are not
    /// stored in this map, so the profile always survives a purge.
    pub fn purge_test_vars(&mut self, kind: TestKind) {
        let prefix = format!("{}.", kind);
        self.variables.retain(|k, _| !k.starts_with(&prefix));
    }

    /// Number of variables currently held for `kind`.
    pub fn test_var_count(&self, kind: TestKind) -> usize {
        let prefix = format!("{}.", kind);
        self.variables.keys().filter(|k| k.starts_with(&prefix)).count()
    }

    /// True when a test is running in this chat.
    pub fn test_active(&self) -> bool {
        self.phase.is_some()
    }
}

/// Shared handle to all per-chat sessions.
///
/// Sessions are created implicitly on first touch. Cloning the store is
/// cheap; all clones see the same map.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<ChatId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the session for `chat_id`, creating it if absent.
    pub async fn with_session<F, R>(&self, chat_id: ChatId, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut map = self.inner.lock().await;
        let session = map.entry(chat_id).or_insert_with(|| Session::new(chat_id));
        f(session)
    }

    /// Snapshot of the session for `chat_id`, if one exists.
    pub async fn get(&self, chat_id: ChatId) -> Option<Session> {
        self.inner.lock().await.get(&chat_id).cloned()
    }

    /// The phase tag for `chat_id`, if a test is active.
    pub async fn phase(&self, chat_id: ChatId) -> Option<ActivePhase> {
        self.inner.lock().await.get(&chat_id).and_then(|s| s.phase)
    }

    /// Set (or clear) the phase tag for `chat_id`.
    pub async fn set_phase(&self, chat_id: ChatId, phase: Option<ActivePhase>) {
        self.with_session(chat_id, |s| s.phase = phase).await;
    }

    /// Register a profile for `chat_id`.
    pub async fn set_profile(&self, chat_id: ChatId, profile: Profile) {
        self.with_session(chat_id, |s| s.profile = Some(profile)).await;
    }

    /// Clear the profile (logout / app reset).
    pub async fn clear_profile(&self, chat_id: ChatId) {
        self.with_session(chat_id, |s| s.profile = None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> Profile {
        Profile {
            unique_id: "u-1".to_string(),
            display_name: "Ada".to_string(),
            age: 36,
            external_user_id: 99,
        }
    }

    #[test]
    fn test_vars_are_namespaced_per_kind() {
        let mut session = Session::new(ChatId(1));
        session.set_var(TestKind::Corsi, "length", json!(4));
        session.set_var(TestKind::Stroop, "length", json!(7));

        assert_eq!(session.get_var(TestKind::Corsi, "length"), Some(&json!(4)));
        assert_eq!(session.get_var(TestKind::Stroop, "length"), Some(&json!(7)));
    }

    #[test]
    fn test_purge_removes_only_one_namespace() {
        let mut session = Session::new(ChatId(1));
        session.set_var(TestKind::Corsi, "length", json!(4));
        session.set_var(TestKind::Corsi, "errors", json!(1));
        session.set_var(TestKind::Raven, "used", json!(["m1"]));

        session.purge_test_vars(TestKind::Corsi);

        assert_eq!(session.test_var_count(TestKind::Corsi), 0);
        assert_eq!(session.test_var_count(TestKind::Raven), 1);
    }

    #[test]
    fn test_purge_preserves_profile() {
        let mut session = Session::new(ChatId(1));
        session.profile = Some(profile());
        session.set_var(TestKind::Fluency, "words", json!(["cat"]));

        session.purge_test_vars(TestKind::Fluency);

        assert_eq!(session.profile, Some(profile()));
    }

    #[tokio::test]
    async fn test_store_creates_session_on_first_touch() {
        let store = SessionStore::new();
        assert!(store.get(ChatId(5)).await.is_none());

        store.with_session(ChatId(5), |_| ()).await;
        assert!(store.get(ChatId(5)).await.is_some());
    }

    #[tokio::test]
    async fn test_store_phase_roundtrip() {
        let store = SessionStore::new();
        let phase = ActivePhase {
            kind: TestKind::Rotation,
            state: PhaseState::Presenting,
        };
        store.set_phase(ChatId(2), Some(phase)).await;
        assert_eq!(store.phase(ChatId(2)).await, Some(phase));

        store.set_phase(ChatId(2), None).await;
        assert_eq!(store.phase(ChatId(2)).await, None);
    }

    #[tokio::test]
    async fn test_store_clones_share_state() {
        let store = SessionStore::new();
        let clone = store.clone();
        store.set_profile(ChatId(3), profile()).await;

        let seen = clone.get(ChatId(3)).await.unwrap();
        assert_eq!(seen.profile, Some(profile()));
    }
}
