//! Stream Heartbeat Monitor
//!
//! Detects dead WebSocket connections that never deliver a close frame.
//! The monitor asks the connection task to send pings at a fixed interval
//! and declares a timeout when no inbound traffic has been seen for longer
//! than the configured window.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Heartbeat tuning.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between outbound pings.
    pub ping_interval: Duration,
    /// Maximum silence before the connection is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Instructions the monitor sends to the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame now.
    SendPing,
    /// No traffic within the timeout window; restart the connection.
    Timeout,
}

/// Shared liveness clock plus the monitoring task.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_seen: Mutex<Instant>,
}

impl HeartbeatMonitor {
    /// Create a monitor; the clock starts now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound traffic of any kind (data, pong, ping).
    pub fn record_activity(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Run until timeout or cancellation.
    ///
    /// Emits `SendPing` every interval and a final `Timeout` (then returns)
    /// once the silence window is exceeded.
    pub async fn run(
        self: Arc<Self>,
        events: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first ping
        // goes out one interval after connect.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if self.silence() >= self.config.timeout {
                        let _ = events.send(HeartbeatEvent::Timeout).await;
                        return;
                    }
                    if events.send(HeartbeatEvent::SendPing).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(ping_ms: u64, timeout_ms: u64) -> Arc<HeartbeatMonitor> {
        Arc::new(HeartbeatMonitor::new(HeartbeatConfig {
            ping_interval: Duration::from_millis(ping_ms),
            timeout: Duration::from_millis(timeout_ms),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn emits_pings_while_traffic_flows() {
        let monitor = monitor(1_000, 60_000);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&monitor).run(tx, cancel.clone()));

        for _ in 0..3 {
            monitor.record_activity();
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        }
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_triggers_timeout_and_stops() {
        let monitor = monitor(1_000, 2_500);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(Arc::clone(&monitor).run(tx, CancellationToken::new()));

        // Two pings fit into the silence window, then the timeout fires.
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert_eq!(rx.recv().await, Some(HeartbeatEvent::Timeout));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_monitor() {
        let monitor = monitor(1_000, 60_000);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&monitor).run(tx, cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
