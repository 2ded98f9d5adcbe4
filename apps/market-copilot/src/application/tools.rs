//! Tool Registry
//!
//! The fixed set of capabilities the agent may invoke. Dispatch is a closed
//! tagged enum: the model addresses tools by name, arguments are validated
//! into typed structs before any handler runs, and handlers only read
//! through the data manager and indicator engine.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use super::data_manager::DataManager;
use super::ports::{MarketDataError, NewsSource, ToolSpec};
use crate::domain::indicators::{self, IndicatorKind};
use crate::domain::market::{Candle, CandleRange, Symbol, Timeframe};

/// Default candle lookback for price summaries.
const DEFAULT_LOOKBACK_BARS: u32 = 30;
/// Lookback used for indicator computation (enough for SMA-200 to stay
/// empty rather than misleading, and for MACD/RSI to converge).
const ANALYSIS_LOOKBACK_BARS: u32 = 100;
/// Hard cap on raw candle rows returned to the model.
const MAX_HISTORY_BARS: u32 = 500;
/// Default and maximum news results.
const DEFAULT_NEWS_RESULTS: u32 = 5;
const MAX_NEWS_RESULTS: u32 = 20;

// =============================================================================
// Errors
// =============================================================================

/// Failure of a single tool invocation.
///
/// Never aborts the turn; the agent feeds the message back to the model as
/// an observation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// The model named a tool that is not in the registry.
    #[error("unknown tool {0:?}")]
    UnknownTool(String),
    /// Arguments did not match the declared schema. Not retried.
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    /// The per-call execution deadline elapsed.
    #[error("tool call timed out")]
    Timeout,
    /// Market data layer error, already typed.
    #[error(transparent)]
    Data(#[from] MarketDataError),
    /// News source failure.
    #[error("news search failed: {0}")]
    News(String),
}

// =============================================================================
// Typed arguments
// =============================================================================

/// Arguments for `price_lookup`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceLookupArgs {
    /// Symbol to quote.
    pub symbol: Symbol,
    /// Candle interval for the history summary (default 1d).
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    /// Bars to summarize (default 30).
    #[serde(default)]
    pub lookback_bars: Option<u32>,
}

/// Arguments for `technical_analysis`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TechnicalAnalysisArgs {
    /// Symbol to analyze.
    pub symbol: Symbol,
    /// Candle interval (default 1d).
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    /// Indicators to compute (default all).
    #[serde(default)]
    pub indicators: Option<Vec<IndicatorKind>>,
}

/// Arguments for `news_search`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsSearchArgs {
    /// Free-text query.
    pub query: String,
    /// Maximum headlines to return (default 5).
    #[serde(default)]
    pub max_results: Option<u32>,
}

/// Arguments for `historical_candles`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoricalCandlesArgs {
    /// Symbol to fetch.
    pub symbol: Symbol,
    /// Candle interval.
    pub timeframe: Timeframe,
    /// Most recent bars to return (default 50, max 500).
    #[serde(default)]
    pub bars: Option<u32>,
}

/// Arguments for `compare_symbols`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompareSymbolsArgs {
    /// Symbols to compare; at least two.
    pub symbols: Vec<Symbol>,
}

/// A validated, ready-to-execute tool invocation.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    /// Current quote plus recent-candle summary.
    PriceLookup(PriceLookupArgs),
    /// Indicator report with derived signals.
    TechnicalAnalysis(TechnicalAnalysisArgs),
    /// Recent headlines.
    NewsSearch(NewsSearchArgs),
    /// Raw OHLCV rows.
    HistoricalCandles(HistoricalCandlesArgs),
    /// Multi-symbol snapshot with per-symbol error isolation.
    CompareSymbols(CompareSymbolsArgs),
}

// =============================================================================
// Registry
// =============================================================================

/// The fixed tool set, bound to its data dependencies.
pub struct ToolRegistry {
    data: Arc<DataManager>,
    news: Option<Arc<dyn NewsSource>>,
}

impl ToolRegistry {
    /// Build the registry.
    #[must_use]
    pub fn new(data: Arc<DataManager>, news: Option<Arc<dyn NewsSource>>) -> Self {
        Self { data, news }
    }

    /// Declared schemas for every tool, sent with each completion request.
    #[must_use]
    pub fn specs() -> Vec<ToolSpec> {
        let timeframes: Vec<&str> = Timeframe::all().iter().map(Timeframe::as_str).collect();

        vec![
            ToolSpec {
                name: "price_lookup".to_string(),
                description: "Get the current price and a recent-history summary for a stock \
                              or crypto symbol"
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "symbol": {
                            "type": "string",
                            "description": "Stock ticker (e.g. AAPL) or crypto pair (e.g. BTC-USD)"
                        },
                        "timeframe": {
                            "type": "string",
                            "enum": timeframes,
                            "description": "Candle interval for the history summary (default 1d)"
                        },
                        "lookback_bars": {
                            "type": "integer",
                            "description": "Number of recent bars to summarize (default 30)"
                        }
                    },
                    "required": ["symbol"]
                }),
            },
            ToolSpec {
                name: "technical_analysis".to_string(),
                description: "Calculate technical indicators (RSI, MACD, Bollinger bands, \
                              moving averages, ATR) and derived signals for a symbol"
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "symbol": { "type": "string" },
                        "timeframe": {
                            "type": "string",
                            "enum": timeframes,
                            "description": "Candle interval (default 1d)"
                        },
                        "indicators": {
                            "type": "array",
                            "items": {
                                "type": "string",
                                "enum": ["rsi", "macd", "bollinger", "sma", "ema", "atr", "all"]
                            },
                            "description": "Indicators to compute (default all)"
                        }
                    },
                    "required": ["symbol"]
                }),
            },
            ToolSpec {
                name: "news_search".to_string(),
                description: "Search recent financial news for a company, symbol, or topic"
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "max_results": {
                            "type": "integer",
                            "description": "Maximum headlines to return (default 5)"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolSpec {
                name: "historical_candles".to_string(),
                description: "Fetch raw OHLCV candles for a symbol and timeframe".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "symbol": { "type": "string" },
                        "timeframe": { "type": "string", "enum": timeframes },
                        "bars": {
                            "type": "integer",
                            "description": "Number of most recent bars (default 50, max 500)"
                        }
                    },
                    "required": ["symbol", "timeframe"]
                }),
            },
            ToolSpec {
                name: "compare_symbols".to_string(),
                description: "Compare current prices across several symbols; failures for one \
                              symbol do not affect the others"
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "symbols": {
                            "type": "array",
                            "items": { "type": "string" },
                            "minItems": 2
                        }
                    },
                    "required": ["symbols"]
                }),
            },
        ]
    }

    /// Validate a named call against its schema without executing it.
    pub fn validate(name: &str, arguments: &Value) -> Result<ToolInvocation, ToolError> {
        fn parse<T: serde::de::DeserializeOwned>(arguments: &Value) -> Result<T, ToolError> {
            serde_json::from_value(arguments.clone())
                .map_err(|e| ToolError::InvalidArgs(e.to_string()))
        }

        match name {
            "price_lookup" => Ok(ToolInvocation::PriceLookup(parse(arguments)?)),
            "technical_analysis" => Ok(ToolInvocation::TechnicalAnalysis(parse(arguments)?)),
            "news_search" => Ok(ToolInvocation::NewsSearch(parse(arguments)?)),
            "historical_candles" => Ok(ToolInvocation::HistoricalCandles(parse(arguments)?)),
            "compare_symbols" => {
                let args: CompareSymbolsArgs = parse(arguments)?;
                if args.symbols.len() < 2 {
                    return Err(ToolError::InvalidArgs(
                        "compare_symbols needs at least two symbols".to_string(),
                    ));
                }
                Ok(ToolInvocation::CompareSymbols(args))
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    /// Execute a validated invocation.
    ///
    /// Handlers read through the data manager only; the per-call timeout is
    /// applied by the agent loop, not here.
    pub async fn execute(&self, invocation: ToolInvocation) -> Result<Value, ToolError> {
        metrics::counter!("copilot_tool_calls_total").increment(1);
        match invocation {
            ToolInvocation::PriceLookup(args) => self.price_lookup(args).await,
            ToolInvocation::TechnicalAnalysis(args) => self.technical_analysis(args).await,
            ToolInvocation::NewsSearch(args) => self.news_search(args).await,
            ToolInvocation::HistoricalCandles(args) => self.historical_candles(args).await,
            ToolInvocation::CompareSymbols(args) => Ok(self.compare_symbols(args).await),
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn price_lookup(&self, args: PriceLookupArgs) -> Result<Value, ToolError> {
        let quote = self.data.latest_quote(&args.symbol).await?;

        let timeframe = args.timeframe.unwrap_or(Timeframe::Day1);
        let lookback = args.lookback_bars.unwrap_or(DEFAULT_LOOKBACK_BARS);
        let range = CandleRange::lookback(timeframe, lookback, Utc::now());

        // History is best-effort: a quote with no summary still answers the
        // question.
        let history = match self.data.candles(&args.symbol, timeframe, range).await {
            Ok(candles) => Some(summarize_candles(&candles)),
            Err(error) => {
                tracing::debug!(symbol = %args.symbol, error = %error, "No candle summary");
                None
            }
        };

        Ok(json!({
            "symbol": args.symbol,
            "price": quote.price,
            "bid": quote.bid,
            "ask": quote.ask,
            "timestamp": quote.timestamp,
            "provider": quote.provider,
            "history_summary": history,
        }))
    }

    async fn technical_analysis(&self, args: TechnicalAnalysisArgs) -> Result<Value, ToolError> {
        let timeframe = args.timeframe.unwrap_or(Timeframe::Day1);
        let range = CandleRange::lookback(timeframe, ANALYSIS_LOOKBACK_BARS, Utc::now());
        let candles = self.data.candles(&args.symbol, timeframe, range).await?;

        let requested = args.indicators.unwrap_or_else(|| vec![IndicatorKind::All]);
        let report = indicators::report(&candles, &requested);

        Ok(json!({
            "symbol": args.symbol,
            "timeframe": timeframe.as_str(),
            "bars_analyzed": candles.len(),
            "current_price": candles.last().map(|c| c.close),
            "indicators": report,
        }))
    }

    async fn news_search(&self, args: NewsSearchArgs) -> Result<Value, ToolError> {
        let max_results = args
            .max_results
            .unwrap_or(DEFAULT_NEWS_RESULTS)
            .min(MAX_NEWS_RESULTS);

        let Some(news) = &self.news else {
            // Distinguish "no news access" from "no news found".
            return Ok(json!({
                "query": args.query,
                "provider_configured": false,
                "results": [],
            }));
        };

        let results = news
            .search(&args.query, max_results)
            .await
            .map_err(ToolError::News)?;

        Ok(json!({
            "query": args.query,
            "provider_configured": true,
            "results": results,
        }))
    }

    async fn historical_candles(&self, args: HistoricalCandlesArgs) -> Result<Value, ToolError> {
        let bars = args.bars.unwrap_or(50).min(MAX_HISTORY_BARS);
        let range = CandleRange::lookback(args.timeframe, bars, Utc::now());
        let candles = self.data.candles(&args.symbol, args.timeframe, range).await?;

        Ok(json!({
            "symbol": args.symbol,
            "timeframe": args.timeframe.as_str(),
            "candles": candles,
        }))
    }

    /// Per-symbol isolation: each fetch runs independently and failures are
    /// reported inline instead of failing the whole call.
    async fn compare_symbols(&self, args: CompareSymbolsArgs) -> Value {
        let fetches = args.symbols.iter().map(|symbol| async move {
            match self.data.latest_quote(symbol).await {
                Ok(quote) => json!({
                    "symbol": symbol,
                    "price": quote.price,
                    "timestamp": quote.timestamp,
                    "provider": quote.provider,
                }),
                Err(error) => json!({
                    "symbol": symbol,
                    "error": error.to_string(),
                }),
            }
        });

        let entries: Vec<Value> = join_all(fetches).await;
        json!({ "symbols": entries })
    }
}

/// Summary statistics over a candle slice.
fn summarize_candles(candles: &[Candle]) -> Value {
    let high = candles.iter().map(|c| c.high).max();
    let low = candles.iter().map(|c| c.low).min();
    let volume: Decimal = candles.iter().map(|c| c.volume).sum();
    let close_sum: Decimal = candles.iter().map(|c| c.close).sum();
    let avg = if candles.is_empty() {
        None
    } else {
        Some(close_sum / Decimal::from(candles.len()))
    };

    json!({
        "latest_close": candles.last().map(|c| c.close),
        "period_high": high,
        "period_low": low,
        "period_avg_close": avg,
        "total_volume": volume,
        "bars": candles.len(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_tool() {
        let err = ToolRegistry::validate("place_order", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }

    #[test]
    fn validate_rejects_missing_required_field() {
        let err = ToolRegistry::validate("price_lookup", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn validate_rejects_unknown_field() {
        let err = ToolRegistry::validate(
            "price_lookup",
            &json!({ "symbol": "AAPL", "leverage": 10 }),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn validate_rejects_bad_symbol() {
        let err =
            ToolRegistry::validate("price_lookup", &json!({ "symbol": "not a symbol!" }))
                .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[test]
    fn validate_accepts_full_price_lookup() {
        let invocation = ToolRegistry::validate(
            "price_lookup",
            &json!({ "symbol": "btc-usd", "timeframe": "1h", "lookback_bars": 12 }),
        )
        .unwrap();
        assert!(matches!(invocation, ToolInvocation::PriceLookup(_)));
    }

    #[test]
    fn validate_compare_needs_two_symbols() {
        let err =
            ToolRegistry::validate("compare_symbols", &json!({ "symbols": ["AAPL"] }))
                .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));

        let ok = ToolRegistry::validate(
            "compare_symbols",
            &json!({ "symbols": ["AAPL", "MSFT"] }),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn specs_cover_all_five_tools() {
        let specs = ToolRegistry::specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "price_lookup",
                "technical_analysis",
                "news_search",
                "historical_candles",
                "compare_symbols"
            ]
        );
        // Every spec declares an object schema with required fields.
        for spec in &specs {
            assert_eq!(spec.parameters["type"], "object");
            assert!(spec.parameters["required"].is_array());
        }
    }

    #[test]
    fn summarize_reports_extremes() {
        use chrono::TimeZone;
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle {
                start_time: chrono::Utc.timestamp_opt(i * 60, 0).unwrap(),
                open: Decimal::from(10 + i),
                high: Decimal::from(20 + i),
                low: Decimal::from(5 + i),
                close: Decimal::from(12 + i),
                volume: Decimal::from(100),
            })
            .collect();

        let summary = summarize_candles(&candles);
        assert_eq!(summary["period_high"], json!("22"));
        assert_eq!(summary["period_low"], json!("5"));
        assert_eq!(summary["bars"], json!(3));
    }
}
