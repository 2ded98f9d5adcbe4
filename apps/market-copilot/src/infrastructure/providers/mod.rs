//! Provider Adapters
//!
//! One adapter per external market data source, each owning one streaming
//! connection and implementing the `MarketProvider` port. The reconnect and
//! heartbeat modules are shared by every adapter.

/// Equities adapter (Alpaca).
pub mod alpaca;
/// Crypto adapter (Binance).
pub mod binance;
/// Stream liveness supervision.
pub mod heartbeat;
/// Reconnection backoff policy.
pub mod reconnect;
