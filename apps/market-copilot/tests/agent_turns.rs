//! End-to-end agent turn scenarios against a seeded data manager and a
//! scripted model, exercising the full path from cache through tools to the
//! synthesized answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use market_copilot::application::agent::{AgentConfig, AgentCore};
use market_copilot::application::data_manager::{DataManager, DataManagerConfig};
use market_copilot::application::ports::{
    CompletionOutcome, LlmClient, LlmMessage, LlmRole, LlmUnavailable, MarketDataError,
    MarketProvider, ProviderEvent, ToolCallRequest, ToolSpec,
};
use market_copilot::application::tools::ToolRegistry;
use market_copilot::domain::connection::{ConnectionStatus, ConnectionTracker};
use market_copilot::domain::market::{
    Candle, CandleRange, MarketClass, Quote, Symbol, Timeframe,
};
use market_copilot::domain::session::TurnOutcome;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test doubles
// =============================================================================

type ScriptStep =
    Box<dyn Fn(&[LlmMessage]) -> Result<CompletionOutcome, LlmUnavailable> + Send + Sync>;

/// Model double driven by a list of closures, one per completion round.
struct ScriptedLlm {
    steps: Mutex<Vec<ScriptStep>>,
}

impl ScriptedLlm {
    fn new(steps: Vec<ScriptStep>) -> Self {
        let mut steps = steps;
        steps.reverse();
        Self {
            steps: Mutex::new(steps),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        _tools: &[ToolSpec],
    ) -> Result<CompletionOutcome, LlmUnavailable> {
        let step = self
            .steps
            .lock()
            .pop()
            .ok_or_else(|| LlmUnavailable("script exhausted".to_string()))?;
        step(messages)
    }
}

/// Provider double with a controllable connection state and REST behavior.
struct FakeProvider {
    class: MarketClass,
    tracker: ConnectionTracker,
    hang_rest: bool,
}

impl FakeProvider {
    fn connected(class: MarketClass) -> Self {
        let tracker = ConnectionTracker::new();
        tracker.connecting();
        tracker.connected();
        Self {
            class,
            tracker,
            hang_rest: false,
        }
    }

    fn in_backoff(class: MarketClass) -> Self {
        let tracker = ConnectionTracker::new();
        tracker.connecting();
        tracker.backoff("stream reset by peer");
        Self {
            class,
            tracker,
            hang_rest: false,
        }
    }
}

#[async_trait]
impl MarketProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn market_class(&self) -> MarketClass {
        self.class
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.tracker.snapshot()
    }

    async fn subscribe(&self, _symbols: &[Symbol]) -> Result<(), MarketDataError> {
        Ok(())
    }

    async fn unsubscribe(&self, _symbols: &[Symbol]) -> Result<(), MarketDataError> {
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        if self.hang_rest {
            std::future::pending::<()>().await;
        }
        Err(MarketDataError::NoData {
            symbol: symbol.to_string(),
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        _timeframe: Timeframe,
        _range: CandleRange,
    ) -> Result<Vec<Candle>, MarketDataError> {
        Err(MarketDataError::NoData {
            symbol: symbol.to_string(),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

fn quote(symbol: &str, price: &str, ts_secs: i64) -> Quote {
    Quote {
        symbol: sym(symbol),
        price: price.parse::<Decimal>().unwrap(),
        bid: None,
        ask: None,
        timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
        provider: "fake".to_string(),
    }
}

/// Build a data manager over `provider` with `quotes` already applied
/// through the public writer path.
async fn seeded_manager(provider: FakeProvider, quotes: Vec<Quote>) -> Arc<DataManager> {
    let manager = Arc::new(DataManager::new(
        DataManagerConfig {
            quote_wait: Duration::from_millis(200),
        },
        vec![Arc::new(provider)],
    ));

    let (tx, rx) = mpsc::channel(64);
    let writer = tokio::spawn(Arc::clone(&manager).run_writer(rx, CancellationToken::new()));
    for q in quotes {
        tx.send(ProviderEvent::Quote(q)).await.unwrap();
    }
    drop(tx);
    writer.await.unwrap();

    manager
}

fn agent_over(manager: Arc<DataManager>, llm: ScriptedLlm, max_iterations: u32) -> AgentCore {
    AgentCore::new(
        Arc::new(llm),
        Arc::new(ToolRegistry::new(manager, None)),
        AgentConfig {
            max_iterations,
            tool_timeout: Duration::from_secs(1),
        },
    )
}

fn call(name: &str, args: serde_json::Value) -> CompletionOutcome {
    CompletionOutcome::ToolCalls(vec![ToolCallRequest {
        id: "call_1".to_string(),
        name: name.to_string(),
        arguments: args,
    }])
}

/// Extract the last tool observation from the prompt.
fn last_observation(messages: &[LlmMessage]) -> serde_json::Value {
    let content = messages
        .iter()
        .rev()
        .find(|m| m.role == LlmRole::Tool)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    serde_json::from_str(&content).unwrap_or(serde_json::Value::Null)
}

// =============================================================================
// Scenarios
// =============================================================================

/// "price of AAPL" with a cached quote: the agent selects the price tool,
/// observes the cached value, and answers with it after a single tool round.
#[tokio::test]
async fn cached_quote_flows_into_the_answer() {
    let manager = seeded_manager(
        FakeProvider::connected(MarketClass::Equity),
        vec![quote("AAPL", "190.12", 1_700_000_000)],
    )
    .await;

    // The second round builds its answer from the observation it was
    // actually given, so the asserted price must have come through the
    // cache and the tool.
    let llm = ScriptedLlm::new(vec![
        Box::new(|_| Ok(call("price_lookup", serde_json::json!({ "symbol": "AAPL" })))),
        Box::new(|messages| {
            let observation = last_observation(messages);
            let price = observation["price"].as_str().unwrap_or("?").to_string();
            Ok(CompletionOutcome::Text(format!(
                "AAPL last traded at {price}."
            )))
        }),
    ]);

    let agent = agent_over(manager, llm, 4);
    let turn = agent
        .answer(&[], "price of AAPL", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Completed);
    assert!(turn.answer.contains("190.12"), "answer: {}", turn.answer);
    // Exactly one tool round: one recorded call, answered on the next round.
    assert_eq!(turn.tool_calls.len(), 1);
    assert!(turn.tool_calls[0].outcome.is_ok());
}

/// An adapter in Backoff produces a typed `ProviderUnavailable` observation
/// within the bounded wait; the turn still ends with a text answer.
#[tokio::test]
async fn backoff_adapter_surfaces_typed_error_to_the_model() {
    let manager = Arc::new(DataManager::new(
        DataManagerConfig {
            quote_wait: Duration::from_millis(200),
        },
        vec![Arc::new(FakeProvider::in_backoff(MarketClass::Equity))],
    ));

    let started = std::time::Instant::now();
    let err = manager.latest_quote(&sym("AAPL")).await.unwrap_err();
    assert_eq!(
        err,
        MarketDataError::ProviderUnavailable {
            provider: "fake".to_string()
        }
    );
    // No bounded wait is consumed for an adapter that is not Connected.
    assert!(started.elapsed() < Duration::from_millis(200));

    let llm = ScriptedLlm::new(vec![
        Box::new(|_| Ok(call("price_lookup", serde_json::json!({ "symbol": "AAPL" })))),
        Box::new(|messages| {
            let observation = last_observation(messages);
            let error = observation["error"].as_str().unwrap_or("").to_string();
            Ok(CompletionOutcome::Text(format!(
                "I cannot quote AAPL right now: {error}"
            )))
        }),
    ]);

    let agent = agent_over(manager, llm, 4);
    let turn = agent
        .answer(&[], "price of AAPL", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Completed);
    assert!(turn.answer.contains("unavailable"), "answer: {}", turn.answer);
    assert!(!turn.tool_calls[0].outcome.is_ok());
}

/// Two tools where one fails: the turn still produces an answer that
/// references the successful tool's result.
#[tokio::test]
async fn partial_tool_failure_still_answers_from_the_successful_one() {
    // BTC-USD is cached and owned by the crypto adapter; AAPL has no
    // provider at all, so its side of the compare fails.
    let manager = seeded_manager(
        FakeProvider::connected(MarketClass::Crypto),
        vec![quote("BTC-USD", "42000.50", 1_700_000_000)],
    )
    .await;

    let llm = ScriptedLlm::new(vec![
        Box::new(|_| {
            Ok(call(
                "compare_symbols",
                serde_json::json!({ "symbols": ["BTC-USD", "AAPL"] }),
            ))
        }),
        Box::new(|messages| {
            let observation = last_observation(messages);
            let entries = observation["symbols"].as_array().cloned().unwrap_or_default();
            let quoted: Vec<String> = entries
                .iter()
                .filter(|e| e.get("price").is_some())
                .map(|e| {
                    format!(
                        "{} at {}",
                        e["symbol"].as_str().unwrap_or("?"),
                        e["price"].as_str().unwrap_or("?")
                    )
                })
                .collect();
            Ok(CompletionOutcome::Text(format!(
                "Only {} could be quoted.",
                quoted.join(", ")
            )))
        }),
    ]);

    let agent = agent_over(manager, llm, 4);
    let turn = agent
        .answer(&[], "compare BTC-USD and AAPL", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Completed);
    assert!(turn.answer.contains("42000.50"), "answer: {}", turn.answer);
    // The compare tool itself succeeded, with the failure annotated
    // per-symbol inside its result.
    assert!(turn.tool_calls[0].outcome.is_ok());
}

/// A hung provider is bounded by the per-call tool timeout and fed back as
/// an error observation instead of stalling the turn.
#[tokio::test(start_paused = true)]
async fn hung_tool_call_times_out_and_is_recovered() {
    let mut provider = FakeProvider::connected(MarketClass::Equity);
    provider.hang_rest = true;
    let manager = Arc::new(DataManager::new(
        DataManagerConfig {
            quote_wait: Duration::from_secs(3_600),
        },
        vec![Arc::new(provider)],
    ));

    let llm = ScriptedLlm::new(vec![
        Box::new(|_| Ok(call("price_lookup", serde_json::json!({ "symbol": "AAPL" })))),
        Box::new(|messages| {
            let observation = last_observation(messages);
            let error = observation["error"].as_str().unwrap_or("").to_string();
            Ok(CompletionOutcome::Text(format!("No data: {error}")))
        }),
    ]);

    let agent = agent_over(manager, llm, 4);
    let turn = agent
        .answer(&[], "price of AAPL", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Completed);
    assert!(turn.answer.contains("timed out"), "answer: {}", turn.answer);
}

/// A model that never stops calling tools terminates within the cap and
/// returns a best-effort truncated answer.
#[tokio::test]
async fn endless_tool_calling_terminates_truncated() {
    let manager = seeded_manager(
        FakeProvider::connected(MarketClass::Crypto),
        vec![quote("BTC-USD", "42000.50", 1_700_000_000)],
    )
    .await;

    let loop_step = || -> ScriptStep {
        Box::new(|_| Ok(call("price_lookup", serde_json::json!({ "symbol": "BTC-USD" }))))
    };
    let llm = ScriptedLlm::new(vec![
        loop_step(),
        loop_step(),
        loop_step(),
        // Synthesis round after the cap.
        Box::new(|_| Ok(CompletionOutcome::Text("best effort summary".to_string()))),
    ]);

    let agent = agent_over(manager, llm, 3);
    let turn = agent
        .answer(&[], "keep digging", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Truncated);
    assert_eq!(turn.iterations, 3);
    assert_eq!(turn.tool_calls.len(), 3);
    assert_eq!(turn.answer, "best effort summary");
}

/// Even when every tool call errors, the loop terminates within the cap.
#[tokio::test]
async fn always_erroring_tools_still_terminate() {
    let manager = Arc::new(DataManager::new(
        DataManagerConfig::default(),
        Vec::new(),
    ));

    let loop_step = || -> ScriptStep {
        Box::new(|_| Ok(call("price_lookup", serde_json::json!({ "symbol": "AAPL" }))))
    };
    let llm = ScriptedLlm::new(vec![
        loop_step(),
        loop_step(),
        // Final synthesis also fails; the fallback summary still answers.
        Box::new(|_| Err(LlmUnavailable("down".to_string()))),
    ]);

    let agent = agent_over(manager, llm, 2);
    let turn = agent
        .answer(&[], "query", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(turn.outcome, TurnOutcome::Truncated);
    assert_eq!(turn.tool_calls.len(), 2);
    assert!(turn.tool_calls.iter().all(|record| !record.outcome.is_ok()));
    assert!(!turn.answer.is_empty());
}
