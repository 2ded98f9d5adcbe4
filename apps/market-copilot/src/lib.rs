#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Market Copilot - Streaming Market Data + LLM Research Agent
//!
//! Aggregates live and historical market data from multiple providers,
//! computes technical indicators, and answers natural-language trading
//! questions through a tool-calling LLM agent behind a session-keyed HTTP
//! API.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and pure logic
//!   - `market`: symbols, quotes, candles
//!   - `connection`: per-adapter connection state machine
//!   - `indicators`: technical indicator formulas
//!   - `session`: agent turn and conversation records
//!
//! - **Application**: The core triad and its ports
//!   - `data_manager`: provider routing, quote/candle cache, backfill merge
//!   - `agent`: the plan-act-observe reasoning loop
//!   - `tools`: the fixed, schema-validated tool registry
//!   - `state`: session-keyed state store for the re-entrant UI cycle
//!   - `ports`: provider, news, and LLM interfaces
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `providers`: Binance and Alpaca streaming adapters
//!   - `llm`: OpenRouter chat-completions client
//!   - `http`: session API and health servers
//!   - `config`, `telemetry`, `metrics`, `news`
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──┐                           ┌──► Agent Core ──► LLM
//!              ├──► event channel ──► Data │        │
//! Alpaca WS ───┘        Manager cache ◄────┴── Tool Registry
//!                                         ▲
//! UI ──► Session API ──► State Manager ───┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O dependencies.
pub mod domain;

/// Application layer - The core triad and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStatus, ConnectionTracker};
pub use domain::market::{Candle, CandleRange, MarketClass, Quote, Symbol, Timeframe};
pub use domain::session::{AgentTurn, ChatMessage, ChatRole, ToolCallRecord, TurnOutcome};

// Application surface
pub use application::agent::{AgentConfig, AgentCore, AgentError};
pub use application::data_manager::{
    DataManager, DataManagerConfig, EVENT_CHANNEL_CAPACITY, ProviderStatusView,
};
pub use application::ports::{
    CompletionOutcome, LlmClient, LlmMessage, LlmUnavailable, MarketDataError, MarketProvider,
    NewsSource, ProviderEvent, ToolCallRequest, ToolSpec,
};
pub use application::state::{SessionState, StateConfig, StateManager};
pub use application::tools::{ToolError, ToolRegistry};

// Infrastructure config
pub use infrastructure::config::{ConfigError, CopilotConfig};

// HTTP servers (for integration tests)
pub use infrastructure::http::{ApiServer, ApiState, HealthServer, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
