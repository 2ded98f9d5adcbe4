//! Application Ports
//!
//! Interfaces the application core depends on: market data providers and the
//! language-model endpoint. Infrastructure adapters implement these; tests
//! substitute in-memory fakes.

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::connection::ConnectionStatus;
use crate::domain::market::{Candle, CandleRange, MarketClass, Quote, Symbol, Timeframe};

// =============================================================================
// Market data port
// =============================================================================

/// Typed errors a market data caller can see.
///
/// Vendor transport failures never cross this boundary; adapters translate
/// them into connection state transitions and one of these values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// The adapter owning the symbol is not connected.
    #[error("provider {provider} is unavailable")]
    ProviderUnavailable {
        /// Adapter name.
        provider: String,
    },
    /// No cached or fetchable value exists.
    #[error("no data for {symbol}")]
    NoData {
        /// The requested symbol.
        symbol: String,
    },
    /// The vendor is throttling; callers should back off rather than retry.
    #[error("rate limited by {provider}")]
    RateLimited {
        /// Adapter name.
        provider: String,
    },
}

/// Normalized event emitted by a provider adapter into the data manager.
///
/// Adapters are the only producers; the data manager's writer task is the
/// only consumer, so cache mutation stays single-writer per shard.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A live quote tick.
    Quote(Quote),
    /// A streamed candle close.
    Candle {
        /// Symbol the bar belongs to.
        symbol: Symbol,
        /// Aggregation interval.
        timeframe: Timeframe,
        /// The bar itself.
        candle: Candle,
    },
}

/// Contract every provider adapter implements.
///
/// One adapter owns one streaming connection and one market class. The
/// streaming side runs as its own task (spawned at startup) and emits
/// [`ProviderEvent`]s; the methods here cover the request/response side.
#[async_trait]
pub trait MarketProvider: Send + Sync {
    /// Stable adapter name for logs and error values.
    fn name(&self) -> &'static str;

    /// Market class this adapter owns.
    fn market_class(&self) -> MarketClass;

    /// Snapshot of the adapter's connection state machine.
    fn connection_status(&self) -> ConnectionStatus;

    /// Add symbols to the live subscription set.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError>;

    /// Remove symbols from the live subscription set.
    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError>;

    /// One-shot REST quote fetch, used when nothing is cached yet.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError>;

    /// Historical backfill over REST.
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: CandleRange,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

// =============================================================================
// News port
// =============================================================================

/// One news headline returned by the news source.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct NewsItem {
    /// Headline text.
    pub headline: String,
    /// Short summary, when the source provides one.
    #[serde(default)]
    pub summary: String,
    /// Publishing outlet.
    #[serde(default)]
    pub source: String,
    /// Publication time, RFC 3339.
    #[serde(default)]
    pub published_at: String,
    /// Link to the article.
    #[serde(default)]
    pub url: String,
}

/// External news search collaborator.
///
/// Optional at runtime: when no news credential is configured the tool
/// degrades to an explicit "not configured" result instead of erroring.
#[async_trait]
pub trait NewsSource: Send + Sync {
    /// Search recent headlines for a query.
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<NewsItem>, String>;
}

// =============================================================================
// LLM port
// =============================================================================

/// The model endpoint failed or is unreachable. Terminal for the turn.
#[derive(Debug, Clone, thiserror::Error)]
#[error("LLM unavailable: {0}")]
pub struct LlmUnavailable(pub String);

/// Role of a message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    /// System instruction.
    System,
    /// End-user message.
    User,
    /// Prior assistant output.
    Assistant,
    /// Tool observation.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    /// Vendor-assigned call id, echoed back with the observation.
    pub id: String,
    /// Declared tool name.
    pub name: String,
    /// JSON arguments as produced by the model.
    pub arguments: serde_json::Value,
}

/// One message in the model conversation.
#[derive(Debug, Clone)]
pub struct LlmMessage {
    /// Author role.
    pub role: LlmRole,
    /// Text content (observation JSON for tool messages).
    pub content: String,
    /// Tool calls attached to an assistant message.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Call id this message answers, for tool messages.
    pub tool_call_id: Option<String>,
}

impl LlmMessage {
    /// System instruction message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(LlmRole::System, content)
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(LlmRole::User, content)
    }

    /// Assistant text message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(LlmRole::Assistant, content)
    }

    /// Assistant message carrying tool-call requests, echoed back to the
    /// model so it can associate the observations that follow.
    #[must_use]
    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Tool observation answering one call.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, observation: &serde_json::Value) -> Self {
        Self {
            role: LlmRole::Tool,
            content: observation.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Declared schema for one tool, sent with every completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does, for the model.
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: serde_json::Value,
}

/// What the model returned.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// A direct text answer; the turn is done.
    Text(String),
    /// One or more tool invocations to execute before the next round.
    ToolCalls(Vec<ToolCallRequest>),
}

/// Thin wrapper over the remote model endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One completion round trip. Pass an empty `tools` slice to force a
    /// plain text answer.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[ToolSpec],
    ) -> Result<CompletionOutcome, LlmUnavailable>;
}
