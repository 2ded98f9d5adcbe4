//! Binance Provider Adapter
//!
//! Streams crypto ticker data over Binance's public WebSocket API and
//! backfills history over REST. No credentials are required for public
//! market data.
//!
//! # Endpoints
//!
//! - Stream: `wss://stream.binance.com:9443/ws` with `SUBSCRIBE` frames for
//!   `<pair>@ticker` streams
//! - REST: `https://api.binance.com/api/v3/ticker/price` and
//!   `/api/v3/klines`
//!
//! Symbols use the internal `BASE-USD` form and map to Binance's USDT pairs
//! (`BTC-USD` ⇄ `BTCUSDT`).

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor};
use super::reconnect::{BackoffConfig, BackoffPolicy};
use crate::application::ports::{MarketDataError, MarketProvider, ProviderEvent};
use crate::domain::connection::{ConnectionStatus, ConnectionTracker};
use crate::domain::market::{Candle, CandleRange, MarketClass, Quote, Symbol, Timeframe};

/// Adapter name used in logs, quotes, and error values.
const PROVIDER_NAME: &str = "binance";

/// Maximum klines per REST request.
const KLINES_LIMIT: u32 = 1_000;

// =============================================================================
// Error Type
// =============================================================================

/// Internal adapter errors. Contained within the adapter: callers of the
/// [`MarketProvider`] surface only ever see [`MarketDataError`].
#[derive(Debug, thiserror::Error)]
pub enum BinanceError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the stream or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No inbound traffic within the heartbeat window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(String),
}

// =============================================================================
// Wire Messages
// =============================================================================

/// Inbound stream payloads we care about.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StreamMessage {
    /// 24h rolling ticker event.
    Ticker(TickerMessage),
    /// Acknowledgement of a SUBSCRIBE/UNSUBSCRIBE command.
    Ack(CommandAck),
}

#[derive(Debug, Deserialize)]
struct TickerMessage {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
}

#[derive(Debug, Deserialize)]
struct CommandAck {
    id: u64,
    #[allow(dead_code)]
    result: Option<serde_json::Value>,
}

/// Outbound subscription command.
#[derive(Debug, Serialize)]
struct CommandFrame {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

/// REST `ticker/price` response.
#[derive(Debug, Deserialize)]
struct PriceTicker {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

/// One kline row: positional array of open time, OHLCV strings, close time,
/// and fields we ignore.
#[derive(Debug, Deserialize)]
struct KlineRow(
    i64,
    String,
    String,
    String,
    String,
    String,
    #[allow(dead_code)] i64,
    #[allow(dead_code)] serde_json::Value,
    #[allow(dead_code)] serde_json::Value,
    #[allow(dead_code)] serde_json::Value,
    #[allow(dead_code)] serde_json::Value,
    #[allow(dead_code)] serde_json::Value,
);

impl KlineRow {
    fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            start_time: Utc.timestamp_millis_opt(self.0).single()?,
            open: Decimal::from_str(&self.1).ok()?,
            high: Decimal::from_str(&self.2).ok()?,
            low: Decimal::from_str(&self.3).ok()?,
            close: Decimal::from_str(&self.4).ok()?,
            volume: Decimal::from_str(&self.5).ok()?,
        })
    }
}

// =============================================================================
// Symbol Mapping
// =============================================================================

/// `BTC-USD` -> `BTCUSDT`. Only USD-quoted pairs are supported.
fn to_vendor_pair(symbol: &Symbol) -> Option<String> {
    let (base, quote) = symbol.as_str().split_once('-')?;
    if quote == "USD" {
        Some(format!("{base}USDT"))
    } else {
        None
    }
}

/// `BTCUSDT` -> `BTC-USD`.
fn from_vendor_pair(pair: &str) -> Option<Symbol> {
    let base = pair.strip_suffix("USDT")?;
    Symbol::parse(&format!("{base}-USD")).ok()
}

/// Stream name for a vendor pair, e.g. `btcusdt@ticker`.
fn ticker_stream(pair: &str) -> String {
    format!("{}@ticker", pair.to_lowercase())
}

// =============================================================================
// Configuration
// =============================================================================

/// Binance adapter configuration.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// WebSocket endpoint.
    pub ws_url: String,
    /// REST base URL.
    pub rest_url: String,
    /// Reconnect backoff tuning.
    pub backoff: BackoffConfig,
    /// Heartbeat tuning.
    pub heartbeat: HeartbeatConfig,
    /// REST request timeout.
    pub rest_timeout: std::time::Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            rest_url: "https://api.binance.com".to_string(),
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rest_timeout: std::time::Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Crypto market data adapter backed by Binance.
pub struct BinanceProvider {
    config: BinanceConfig,
    http: reqwest::Client,
    tracker: ConnectionTracker,
    events: mpsc::Sender<ProviderEvent>,
    cancel: CancellationToken,
    /// Active stream names (`btcusdt@ticker`), restored on reconnect.
    subscriptions: RwLock<BTreeSet<String>>,
    /// Streams removed since the last flush, to send as UNSUBSCRIBE.
    pending_unsubscribe: Mutex<Vec<String>>,
    subs_changed: Notify,
    command_id: AtomicU64,
}

impl BinanceProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        config: BinanceConfig,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, BinanceError> {
        let http = reqwest::Client::builder()
            .timeout(config.rest_timeout)
            .build()
            .map_err(|e| BinanceError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http,
            tracker: ConnectionTracker::new(),
            events,
            cancel,
            subscriptions: RwLock::new(BTreeSet::new()),
            pending_unsubscribe: Mutex::new(Vec::new()),
            subs_changed: Notify::new(),
            command_id: AtomicU64::new(1),
        })
    }

    /// Run the streaming connection until shutdown.
    ///
    /// Reconnects with exponential backoff on any stream failure; the
    /// connection tracker reflects every transition.
    pub async fn run(self: Arc<Self>) {
        let policy = BackoffPolicy::new(self.config.backoff.clone());

        loop {
            if self.cancel.is_cancelled() {
                self.tracker.disconnected();
                return;
            }

            self.tracker.connecting();
            match self.connect_and_stream().await {
                Ok(()) => {
                    tracing::info!("Binance stream closed gracefully");
                    self.tracker.disconnected();
                    return;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Binance stream error");
                    self.tracker.backoff(error.to_string());

                    let failures = self.tracker.retry_count().saturating_sub(1);
                    let delay = policy.delay_for(failures);
                    tracing::info!(
                        attempt = self.tracker.retry_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to Binance stream"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            self.tracker.disconnected();
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_stream(&self) -> Result<(), BinanceError> {
        tracing::info!(url = %self.config.ws_url, "Connecting to Binance stream");
        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(&self.config.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        // The upgrade is the whole handshake for the public stream.
        self.tracker.connected();

        let streams: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        if !streams.is_empty() {
            self.send_command(&mut write, "SUBSCRIBE", streams).await?;
        }

        let heartbeat = Arc::new(HeartbeatMonitor::new(self.config.heartbeat.clone()));
        let (hb_tx, mut hb_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let hb_cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(&heartbeat).run(hb_tx, hb_cancel.clone()));

        let result = self
            .stream_loop(&mut write, &mut read, &heartbeat, &mut hb_rx)
            .await;
        hb_cancel.cancel();
        result
    }

    async fn stream_loop<W, R>(
        &self,
        write: &mut W,
        read: &mut R,
        heartbeat: &HeartbeatMonitor,
        hb_rx: &mut mpsc::Receiver<HeartbeatEvent>,
    ) -> Result<(), BinanceError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),

                () = self.subs_changed.notified() => {
                    self.flush_subscription_changes(write).await?;
                }

                event = hb_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        write.send(Message::Ping(vec![].into())).await?;
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        tracing::warn!("Binance heartbeat timeout");
                        return Err(BinanceError::HeartbeatTimeout);
                    }
                    None => {}
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_activity();
                        self.handle_text(&text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat.record_activity(),
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Binance sent close frame");
                        return Err(BinanceError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                    None => return Err(BinanceError::ConnectionClosed),
                },
            }
        }
    }

    /// Decode one text frame and emit normalized events.
    ///
    /// A malformed frame is logged and skipped; it never tears the stream
    /// down.
    async fn handle_text(&self, text: &str) {
        match serde_json::from_str::<StreamMessage>(text) {
            Ok(StreamMessage::Ticker(ticker)) => {
                if ticker.event != "24hrTicker" {
                    return;
                }
                if let Some(quote) = ticker_to_quote(&ticker) {
                    let _ = self.events.send(ProviderEvent::Quote(quote)).await;
                }
            }
            Ok(StreamMessage::Ack(ack)) => {
                tracing::debug!(id = ack.id, "Binance subscription ack");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Unrecognized Binance message");
            }
        }
    }

    async fn flush_subscription_changes<W>(&self, write: &mut W) -> Result<(), BinanceError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let removed: Vec<String> = std::mem::take(&mut *self.pending_unsubscribe.lock());
        if !removed.is_empty() {
            self.send_command(write, "UNSUBSCRIBE", removed).await?;
        }

        let current: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        if !current.is_empty() {
            // SUBSCRIBE with the full set is idempotent on Binance.
            self.send_command(write, "SUBSCRIBE", current).await?;
        }
        Ok(())
    }

    async fn send_command<W>(
        &self,
        write: &mut W,
        method: &'static str,
        params: Vec<String>,
    ) -> Result<(), BinanceError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let frame = CommandFrame {
            method,
            params,
            id: self.command_id.fetch_add(1, Ordering::Relaxed),
        };
        let json = serde_json::to_string(&frame)
            .map_err(|e| BinanceError::Http(format!("failed to serialize command: {e}")))?;

        tracing::debug!(method, params = ?frame.params, "Sending Binance command");
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

fn ticker_to_quote(ticker: &TickerMessage) -> Option<Quote> {
    let symbol = from_vendor_pair(&ticker.symbol)?;
    Some(Quote {
        symbol,
        price: Decimal::from_str(&ticker.last_price).ok()?,
        bid: Decimal::from_str(&ticker.bid).ok(),
        ask: Decimal::from_str(&ticker.ask).ok(),
        timestamp: Utc.timestamp_millis_opt(ticker.event_time_ms).single()?,
        provider: PROVIDER_NAME.to_string(),
    })
}

// =============================================================================
// MarketProvider implementation
// =============================================================================

#[async_trait]
impl MarketProvider for BinanceProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn market_class(&self) -> MarketClass {
        MarketClass::Crypto
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.tracker.snapshot()
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        let streams: Vec<String> = symbols
            .iter()
            .filter_map(to_vendor_pair)
            .map(|pair| ticker_stream(&pair))
            .collect();

        if streams.is_empty() {
            return Ok(());
        }

        {
            let mut subs = self.subscriptions.write();
            for stream in streams {
                subs.insert(stream);
            }
        }
        self.subs_changed.notify_one();
        tracing::info!(symbols = ?symbols, "Binance subscriptions updated");
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        let streams: Vec<String> = symbols
            .iter()
            .filter_map(to_vendor_pair)
            .map(|pair| ticker_stream(&pair))
            .collect();

        let mut removed = Vec::new();
        {
            let mut subs = self.subscriptions.write();
            for stream in streams {
                if subs.remove(&stream) {
                    removed.push(stream);
                }
            }
        }
        if !removed.is_empty() {
            self.pending_unsubscribe.lock().extend(removed);
            self.subs_changed.notify_one();
        }
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        let pair = to_vendor_pair(symbol).ok_or_else(|| MarketDataError::NoData {
            symbol: symbol.to_string(),
        })?;

        let url = format!("{}/api/v3/ticker/price", self.config.rest_url);
        let response = self
            .http
            .get(&url)
            .query(&[("symbol", pair.as_str())])
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(symbol = %symbol, error = %error, "Binance price fetch failed");
                MarketDataError::NoData {
                    symbol: symbol.to_string(),
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(MarketDataError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let ticker: PriceTicker =
            response.json().await.map_err(|_| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })?;
        let price = Decimal::from_str(&ticker.price).map_err(|_| MarketDataError::NoData {
            symbol: symbol.to_string(),
        })?;

        Ok(Quote {
            symbol: symbol.clone(),
            price,
            bid: None,
            ask: None,
            timestamp: Utc::now(),
            provider: PROVIDER_NAME.to_string(),
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: CandleRange,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let pair = to_vendor_pair(symbol).ok_or_else(|| MarketDataError::NoData {
            symbol: symbol.to_string(),
        })?;

        let url = format!("{}/api/v3/klines", self.config.rest_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("symbol", pair.as_str()),
                // Binance interval names match our canonical timeframes.
                ("interval", timeframe.as_str()),
                ("startTime", &range.start.timestamp_millis().to_string()),
                ("endTime", &range.end.timestamp_millis().to_string()),
                ("limit", &KLINES_LIMIT.to_string()),
            ])
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(symbol = %symbol, error = %error, "Binance klines fetch failed");
                MarketDataError::NoData {
                    symbol: symbol.to_string(),
                }
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(MarketDataError::NoData {
                symbol: symbol.to_string(),
            });
        }

        let rows: Vec<KlineRow> =
            response.json().await.map_err(|_| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })?;

        Ok(rows.iter().filter_map(KlineRow::to_candle).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_maps_to_usdt_pair() {
        let sym = Symbol::parse("BTC-USD").unwrap();
        assert_eq!(to_vendor_pair(&sym).as_deref(), Some("BTCUSDT"));
    }

    #[test]
    fn non_usd_quote_is_unsupported() {
        let sym = Symbol::parse("BTC-EUR").unwrap();
        assert_eq!(to_vendor_pair(&sym), None);
        let equity = Symbol::parse("AAPL").unwrap();
        assert_eq!(to_vendor_pair(&equity), None);
    }

    #[test]
    fn vendor_pair_maps_back() {
        let sym = from_vendor_pair("ETHUSDT").unwrap();
        assert_eq!(sym.as_str(), "ETH-USD");
        assert_eq!(from_vendor_pair("ETHBTC"), None);
    }

    #[test]
    fn ticker_stream_name_is_lowercase() {
        assert_eq!(ticker_stream("BTCUSDT"), "btcusdt@ticker");
    }

    #[test]
    fn ticker_message_decodes_to_quote() {
        let raw = r#"{
            "e": "24hrTicker", "E": 1700000000000, "s": "BTCUSDT",
            "c": "42000.50", "b": "42000.10", "a": "42000.90",
            "v": "1000", "P": "2.5"
        }"#;

        let message: StreamMessage = serde_json::from_str(raw).unwrap();
        let StreamMessage::Ticker(ticker) = message else {
            panic!("expected ticker");
        };
        let quote = ticker_to_quote(&ticker).unwrap();

        assert_eq!(quote.symbol.as_str(), "BTC-USD");
        assert_eq!(quote.price, Decimal::from_str("42000.50").unwrap());
        assert_eq!(quote.bid, Some(Decimal::from_str("42000.10").unwrap()));
        assert_eq!(quote.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(quote.provider, "binance");
    }

    #[test]
    fn command_ack_decodes() {
        let raw = r#"{"result": null, "id": 7}"#;
        let message: StreamMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(message, StreamMessage::Ack(CommandAck { id: 7, .. })));
    }

    #[test]
    fn kline_row_parses_to_candle() {
        let raw = r#"[
            [1700000000000, "100.0", "110.0", "95.0", "105.0", "1234.5",
             1700000059999, "0", 10, "0", "0", "0"]
        ]"#;
        let rows: Vec<KlineRow> = serde_json::from_str(raw).unwrap();
        let candle = rows[0].to_candle().unwrap();

        assert_eq!(candle.start_time.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(candle.open, Decimal::from(100));
        assert_eq!(candle.high, Decimal::from(110));
        assert_eq!(candle.low, Decimal::from(95));
        assert_eq!(candle.close, Decimal::from(105));
    }

    #[tokio::test]
    async fn subscribe_tracks_stream_names() {
        let (tx, _rx) = mpsc::channel(8);
        let provider = BinanceProvider::new(
            BinanceConfig::default(),
            tx,
            CancellationToken::new(),
        )
        .unwrap();

        let symbols = vec![
            Symbol::parse("BTC-USD").unwrap(),
            Symbol::parse("ETH-USD").unwrap(),
            // Equities are silently skipped by the crypto adapter.
            Symbol::parse("AAPL").unwrap(),
        ];
        provider.subscribe(&symbols).await.unwrap();

        let subs = provider.subscriptions.read().clone();
        assert_eq!(subs.len(), 2);
        assert!(subs.contains("btcusdt@ticker"));
        assert!(subs.contains("ethusdt@ticker"));

        provider
            .unsubscribe(&[Symbol::parse("BTC-USD").unwrap()])
            .await
            .unwrap();
        assert_eq!(provider.subscriptions.read().len(), 1);
        assert_eq!(
            provider.pending_unsubscribe.lock().as_slice(),
            ["btcusdt@ticker"]
        );
    }

    #[test]
    fn default_config_points_at_production() {
        let config = BinanceConfig::default();
        assert!(config.ws_url.starts_with("wss://stream.binance.com"));
        assert!(config.rest_url.starts_with("https://api.binance.com"));
    }
}
