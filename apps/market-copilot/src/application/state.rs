//! State Manager
//!
//! Process-wide store of per-session state for the stateless, re-entrant UI
//! cycle. Each session is keyed by a UUID, created on first interaction,
//! serialized to a single writer at a time, and expired after an inactivity
//! window. Everything lives in memory; persistence is an external
//! collaborator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::market::{Symbol, Timeframe};
use crate::domain::session::{ChatMessage, ChatRole};

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for session lifecycle.
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Sessions idle longer than this are torn down.
    pub idle_expiry: Duration,
    /// Watch list a fresh session starts with.
    pub default_watchlist: Vec<Symbol>,
    /// Timeframe a fresh session starts with.
    pub default_timeframe: Timeframe,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(30 * 60),
            default_watchlist: Vec::new(),
            default_timeframe: Timeframe::Day1,
        }
    }
}

// =============================================================================
// Session state
// =============================================================================

/// Mutable per-session state, guarded by the session's writer lock.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Symbols the session is watching.
    pub watchlist: Vec<Symbol>,
    /// Symbol currently in focus, if any.
    pub selected_symbol: Option<Symbol>,
    /// Timeframe currently in focus.
    pub selected_timeframe: Timeframe,
    /// Model id override for this session, if the user picked one.
    pub model_override: Option<String>,
    /// Retained conversation history.
    pub history: Vec<ChatMessage>,
}

impl SessionState {
    /// Add a symbol to the watch list if not present.
    pub fn add_to_watchlist(&mut self, symbol: Symbol) {
        if !self.watchlist.contains(&symbol) {
            self.watchlist.push(symbol);
        }
    }

    /// Remove a symbol from the watch list.
    pub fn remove_from_watchlist(&mut self, symbol: &Symbol) {
        self.watchlist.retain(|s| s != symbol);
    }

    /// Append a user/assistant exchange to the history.
    pub fn record_exchange(&mut self, query: &str, answer: &str) {
        self.history.push(ChatMessage::new(ChatRole::User, query));
        self.history
            .push(ChatMessage::new(ChatRole::Assistant, answer));
    }

    /// Drop the conversation history.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// One live session: the state plus its writer lock and turn bookkeeping.
pub struct SessionEntry {
    state: tokio::sync::Mutex<SessionState>,
    active_turn: Mutex<Option<CancellationToken>>,
    last_activity: Mutex<Instant>,
}

impl SessionEntry {
    fn new(state: SessionState) -> Self {
        Self {
            state: tokio::sync::Mutex::new(state),
            active_turn: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Acquire the session's writer lock.
    ///
    /// Held for the duration of a read-modify-write cycle (including a full
    /// agent turn), which is what serializes access per session and keeps a
    /// single outstanding LLM call per session.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Register a new turn and get its cancellation token.
    ///
    /// Call with the writer lock held; the previous token, if any, is
    /// replaced.
    #[must_use]
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.active_turn.lock() = Some(token.clone());
        self.touch();
        token
    }

    /// Clear turn bookkeeping once the turn ends.
    pub fn finish_turn(&self) {
        *self.active_turn.lock() = None;
        self.touch();
    }

    /// Cancel the in-flight turn, if one exists.
    ///
    /// Returns whether a turn was actually cancelled.
    pub fn cancel_turn(&self) -> bool {
        self.active_turn.lock().as_ref().is_some_and(|token| {
            token.cancel();
            true
        })
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn is_expired(&self, idle_expiry: Duration) -> bool {
        // A session with a turn in flight is never expired out from under it.
        if self.active_turn.lock().is_some() {
            return false;
        }
        self.last_activity.lock().elapsed() >= idle_expiry
    }
}

// =============================================================================
// State Manager
// =============================================================================

/// Keyed store of all live sessions.
pub struct StateManager {
    config: StateConfig,
    sessions: RwLock<HashMap<Uuid, Arc<SessionEntry>>>,
}

impl StateManager {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: StateConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get a session, creating it on first interaction.
    ///
    /// Every access sweeps expired sessions and refreshes the entry's
    /// activity clock.
    #[must_use]
    pub fn session(&self, id: Uuid) -> Arc<SessionEntry> {
        self.sweep_expired();

        if let Some(entry) = self.sessions.read().get(&id) {
            entry.touch();
            return Arc::clone(entry);
        }

        let mut sessions = self.sessions.write();
        let entry = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(SessionEntry::new(self.fresh_state())));
        entry.touch();
        Arc::clone(entry)
    }

    /// Allocate a new session id and initialize its state.
    #[must_use]
    pub fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let _ = self.session(id);
        id
    }

    /// Whether a session currently exists.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.sweep_expired();
        self.sessions.read().contains_key(&id)
    }

    /// Explicitly tear down a session.
    ///
    /// Returns whether the session existed. An in-flight turn is cancelled.
    pub fn end_session(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id);
        removed.is_some_and(|entry| {
            entry.cancel_turn();
            true
        })
    }

    /// Cancel the in-flight turn of a session without removing it.
    pub fn cancel_turn(&self, id: Uuid) -> bool {
        self.sessions
            .read()
            .get(&id)
            .is_some_and(|entry| entry.cancel_turn())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sweep_expired();
        self.sessions.read().len()
    }

    fn fresh_state(&self) -> SessionState {
        SessionState {
            watchlist: self.config.default_watchlist.clone(),
            selected_symbol: None,
            selected_timeframe: self.config.default_timeframe,
            model_override: None,
            history: Vec::new(),
        }
    }

    /// Drop sessions idle past the expiry window.
    fn sweep_expired(&self) {
        let idle_expiry = self.config.idle_expiry;
        let has_expired = self
            .sessions
            .read()
            .values()
            .any(|entry| entry.is_expired(idle_expiry));
        if !has_expired {
            return;
        }

        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| !entry.is_expired(idle_expiry));
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = sessions.len(), "Expired idle sessions");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
