//! Per-user conversation memory.
//!
//! Sessions live in a concurrent map keyed by user id. Each session sits
//! behind its own lock, so writes to one user's history are serialized while
//! different users never contend. Memory is in-process only and is lost on
//! restart.

use dashmap::DashMap;
use hrdesk_core::config::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

/// Bounded history of one user.
#[derive(Debug)]
pub struct Session {
    user_id: String,
    turns: VecDeque<ConversationTurn>,
    window: usize,
}

impl Session {
    fn new(user_id: impl Into<String>, window: usize) -> Self {
        Self {
            user_id: user_id.into(),
            turns: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Turns currently held, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn push(&mut self, role: TurnRole, text: impl Into<String>) {
        if self.window == 0 {
            return;
        }
        self.turns.push_back(ConversationTurn {
            role,
            text: text.into(),
        });
        while self.turns.len() > self.window {
            self.turns.pop_front();
        }
    }

    fn render(&self) -> Vec<String> {
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text))
            .collect()
    }
}

/// Shared handle to a session.
pub type SessionHandle = Arc<Mutex<Session>>;

struct SessionSlot {
    session: SessionHandle,
    last_used: AtomicU64,
}

/// Store of live sessions.
pub struct SessionStore {
    sessions: DashMap<String, SessionSlot>,
    window: usize,
    max_sessions: Option<usize>,
    enabled: bool,
    clock: AtomicU64,
}

impl SessionStore {
    /// Create a store keeping the `window` most recent turns per user.
    pub fn new(window: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            window,
            max_sessions: None,
            enabled: true,
            clock: AtomicU64::new(0),
        }
    }

    /// A store that remembers nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0)
        }
    }

    /// Evict the least recently used session once `max` sessions are live.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max.max(1));
        self
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        if !config.enabled() {
            return Self::disabled();
        }
        let store = Self::new(config.k);
        match config.max_sessions {
            Some(max) => store.with_max_sessions(max),
            None => store,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get the session of `user_id`, creating it on first use.
    ///
    /// With memory disabled the returned session is detached and discards
    /// everything appended to it.
    pub fn get_or_create(&self, user_id: &str) -> SessionHandle {
        if !self.enabled {
            return Arc::new(Mutex::new(Session::new(user_id, 0)));
        }

        let stamp = self.tick();
        let (handle, created) = match self.sessions.get(user_id) {
            Some(slot) => {
                slot.last_used.store(stamp, Ordering::Relaxed);
                (Arc::clone(&slot.session), false)
            }
            None => {
                let slot = self
                    .sessions
                    .entry(user_id.to_string())
                    .or_insert_with(|| SessionSlot {
                        session: Arc::new(Mutex::new(Session::new(user_id, self.window))),
                        last_used: AtomicU64::new(stamp),
                    });
                (Arc::clone(&slot.session), true)
            }
        };

        if created {
            tracing::debug!(user_id, "Created session");
            self.evict_over_cap(user_id);
        }
        handle
    }

    /// Append one turn to a session.
    pub fn append_turn(&self, session: &SessionHandle, role: TurnRole, text: &str) {
        if !self.enabled {
            return;
        }
        lock(session).push(role, text);
    }

    /// History lines of a session, oldest first ("user: ..." / "assistant: ...").
    pub fn render_history(&self, session: &SessionHandle) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        lock(session).render()
    }

    /// Record a completed question/answer exchange.
    ///
    /// Both turns are appended under one lock so concurrent exchanges of the
    /// same user never interleave.
    pub fn commit_exchange(&self, user_id: &str, question: &str, answer: &str) {
        if !self.enabled {
            return;
        }
        let session = self.get_or_create(user_id);
        let mut guard = lock(&session);
        guard.push(TurnRole::User, question);
        guard.push(TurnRole::Assistant, answer);
        tracing::debug!(user_id, turns = guard.len(), "Committed exchange");
    }

    /// History of `user_id` without creating a session.
    pub fn history(&self, user_id: &str) -> Vec<String> {
        let handle = match self.sessions.get(user_id) {
            Some(slot) => Arc::clone(&slot.session),
            None => return Vec::new(),
        };
        self.render_history(&handle)
    }

    /// Drop the session of `user_id`.
    pub fn remove(&self, user_id: &str) -> bool {
        self.sessions.remove(user_id).is_some()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_over_cap(&self, keep: &str) {
        let Some(max) = self.max_sessions else {
            return;
        };

        while self.sessions.len() > max {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());

            match oldest {
                Some(user_id) => {
                    self.sessions.remove(&user_id);
                    tracing::debug!(user_id = %user_id, "Evicted least recently used session");
                }
                None => break,
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}

fn lock(session: &SessionHandle) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let store = SessionStore::new(3);
        let session = store.get_or_create("u1");

        for i in 0..4 {
            store.append_turn(&session, TurnRole::User, &format!("message {}", i));
        }

        let history = store.render_history(&session);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], "user: message 1");
        assert_eq!(history[2], "user: message 3");
    }

    #[test]
    fn test_get_or_create_returns_same_session() {
        let store = SessionStore::new(4);
        let a = store.get_or_create("u1");
        let b = store.get_or_create("u1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_commit_exchange_renders_both_turns() {
        let store = SessionStore::new(10);
        store.commit_exchange("u1", "How many days off?", "Twenty.");

        assert_eq!(
            store.history("u1"),
            vec!["user: How many days off?", "assistant: Twenty."]
        );
        assert!(store.history("u2").is_empty());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new(10);
        store.commit_exchange("alice", "q1", "a1");
        store.commit_exchange("bob", "q2", "a2");

        assert_eq!(store.history("alice")[0], "user: q1");
        assert_eq!(store.history("bob")[0], "user: q2");
    }

    #[test]
    fn test_disabled_store_is_noop() {
        let store = SessionStore::disabled();
        let session = store.get_or_create("u1");
        store.append_turn(&session, TurnRole::User, "hello");
        store.commit_exchange("u1", "q", "a");

        assert!(store.render_history(&session).is_empty());
        assert!(store.history("u1").is_empty());
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_from_config_disabled() {
        let config = MemoryConfig {
            kind: "none".to_string(),
            ..MemoryConfig::default()
        };
        assert!(!SessionStore::from_config(&config).is_enabled());
    }

    #[test]
    fn test_max_sessions_evicts_least_recently_used() {
        let store = SessionStore::new(4).with_max_sessions(2);
        store.commit_exchange("a", "q", "a");
        store.commit_exchange("b", "q", "a");
        // Touch "a" so "b" becomes the oldest
        store.get_or_create("a");
        store.commit_exchange("c", "q", "a");

        assert_eq!(store.session_count(), 2);
        assert!(!store.history("a").is_empty());
        assert!(store.history("b").is_empty());
        assert!(!store.history("c").is_empty());
    }

    #[test]
    fn test_concurrent_commits_keep_pairs_together() {
        let store = Arc::new(SessionStore::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        store.commit_exchange("shared", &format!("q{}-{}", i, j), "a");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.history("shared");
        assert_eq!(history.len(), 400);
        for pair in history.chunks(2) {
            assert!(pair[0].starts_with("user: "));
            assert_eq!(pair[1], "assistant: a");
        }
    }
}
