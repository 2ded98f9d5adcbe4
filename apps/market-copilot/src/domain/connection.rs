//! Provider Connection Lifecycle
//!
//! State machine for a provider adapter's streaming connection. Each adapter
//! owns one tracker; the data manager and health endpoint read snapshots.
//!
//! Transitions:
//!
//! ```text
//! Disconnected -> Connecting   on subscribe / startup
//! Connecting   -> Connected    on successful handshake (resets retries)
//! Connected    -> Backoff      on stream error, close, or missed heartbeat
//! Backoff      -> Connecting   after the computed backoff delay
//! any          -> Disconnected on unsubscribe / shutdown
//! ```

use parking_lot::RwLock;
use serde::Serialize;

/// Connection state of one provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Stream established and authenticated.
    Connected,
    /// Waiting out a reconnect delay after a failure.
    Backoff,
}

impl ConnectionState {
    /// State name for logs and status payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

/// Point-in-time view of a tracker.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Consecutive failed connection cycles since the last Connected period.
    pub retry_count: u32,
    /// Most recent transport error, if any.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct TrackerInner {
    state: ConnectionState,
    retry_count: u32,
    last_error: Option<String>,
}

/// Shared connection state tracker for one adapter.
///
/// Writers are the adapter's connection task; all other components only read
/// snapshots.
#[derive(Debug)]
pub struct ConnectionTracker {
    inner: RwLock<TrackerInner>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    /// Create a tracker in the Disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TrackerInner {
                state: ConnectionState::Disconnected,
                retry_count: 0,
                last_error: None,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Full snapshot for status reporting.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        let inner = self.inner.read();
        ConnectionStatus {
            state: inner.state,
            retry_count: inner.retry_count,
            last_error: inner.last_error.clone(),
        }
    }

    /// A connection attempt is starting.
    pub fn connecting(&self) {
        self.inner.write().state = ConnectionState::Connecting;
    }

    /// Handshake succeeded; the retry counter resets.
    pub fn connected(&self) {
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Connected;
        inner.retry_count = 0;
        inner.last_error = None;
    }

    /// The stream failed; record the error and enter Backoff.
    ///
    /// Increments the retry counter, which feeds the exponential delay of
    /// the next attempt.
    pub fn backoff(&self, error: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Backoff;
        inner.retry_count = inner.retry_count.saturating_add(1);
        inner.last_error = Some(error.into());
    }

    /// Explicit unsubscribe or shutdown.
    pub fn disconnected(&self) {
        self.inner.write().state = ConnectionState::Disconnected;
    }

    /// Consecutive failures since the last Connected period.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.read().retry_count
    }
}
