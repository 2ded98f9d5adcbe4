//! Alpaca Provider Adapter
//!
//! Streams US equity quotes and bars over Alpaca's market data WebSocket and
//! backfills history over the data REST API. Both transports authenticate
//! with an API key pair.
//!
//! # Stream Protocol
//!
//! 1. Connect; the server sends `[{"T":"success","msg":"connected"}]`
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `[{"T":"success","msg":"authenticated"}]` or an error
//! 4. Send `{"action":"subscribe","quotes":[...],"bars":[...]}`
//!
//! Data messages arrive as JSON arrays of objects tagged by `"T"`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
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
const PROVIDER_NAME: &str = "alpaca";

/// Maximum bars per REST request.
const BARS_LIMIT: u32 = 1_000;

// =============================================================================
// Error Type
// =============================================================================

/// Internal adapter errors, contained at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum AlpacaError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server closed the stream or the stream ended.
    #[error("connection closed")]
    ConnectionClosed,

    /// No inbound traffic within the heartbeat window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Credentials were rejected during the stream handshake.
    #[error("authentication failed ({code}): {msg}")]
    AuthenticationFailed {
        /// Vendor error code.
        code: i32,
        /// Vendor error message.
        msg: String,
    },

    /// Vendor error frame outside authentication.
    #[error("stream error ({code}): {msg}")]
    StreamError {
        /// Vendor error code.
        code: i32,
        /// Vendor error message.
        msg: String,
    },

    /// HTTP client construction or serialization failed.
    #[error("HTTP client error: {0}")]
    Http(String),
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API key pair.
#[derive(Clone)]
pub struct AlpacaCredentials {
    key: String,
    secret: String,
}

impl AlpacaCredentials {
    /// Wrap a key pair.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self { key, secret }
    }
}

impl std::fmt::Debug for AlpacaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaCredentials")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Wire Messages
// =============================================================================

/// Inbound stream message, tagged by `"T"`.
#[derive(Debug, Deserialize)]
#[serde(tag = "T")]
enum StreamMessage {
    /// Control acknowledgement (`connected`, `authenticated`).
    #[serde(rename = "success")]
    Success {
        /// Acknowledgement text.
        msg: String,
    },
    /// Vendor error frame.
    #[serde(rename = "error")]
    Error {
        /// Vendor error code.
        code: i32,
        /// Vendor error message.
        msg: String,
    },
    /// Subscription confirmation.
    #[serde(rename = "subscription")]
    Subscription {
        #[serde(default)]
        quotes: Vec<String>,
        #[serde(default)]
        bars: Vec<String>,
    },
    /// Quote tick.
    #[serde(rename = "q")]
    Quote(QuoteMessage),
    /// Minute bar.
    #[serde(rename = "b")]
    Bar(BarMessage),
    /// Anything else we do not consume (trades, statuses, LULD).
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Deserialize)]
struct QuoteMessage {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "bp")]
    bid_price: Decimal,
    #[serde(rename = "ap")]
    ask_price: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct BarMessage {
    #[serde(rename = "S")]
    symbol: String,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "t")]
    start_time: DateTime<Utc>,
}

/// Outbound auth request.
#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    action: &'static str,
    key: &'a str,
    secret: &'a str,
}

/// Outbound subscribe/unsubscribe request.
#[derive(Debug, Serialize)]
struct SubscriptionRequest {
    action: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    quotes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bars: Vec<String>,
}

/// REST latest-quote response.
#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: RestQuote,
}

#[derive(Debug, Deserialize)]
struct RestQuote {
    #[serde(rename = "bp")]
    bid_price: Decimal,
    #[serde(rename = "ap")]
    ask_price: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

/// REST bars response.
#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<RestBar>,
}

#[derive(Debug, Deserialize)]
struct RestBar {
    #[serde(rename = "t")]
    start_time: DateTime<Utc>,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
}

/// Decode one text frame into stream messages.
///
/// Alpaca sends arrays of tagged objects; some control frames arrive as a
/// single object.
fn decode_frame(text: &str) -> Result<Vec<StreamMessage>, serde_json::Error> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
    } else {
        serde_json::from_str(trimmed).map(|msg| vec![msg])
    }
}

/// REST timeframe parameter for a canonical timeframe.
const fn rest_timeframe(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Min1 => "1Min",
        Timeframe::Min5 => "5Min",
        Timeframe::Min15 => "15Min",
        Timeframe::Hour1 => "1Hour",
        Timeframe::Hour4 => "4Hour",
        Timeframe::Day1 => "1Day",
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Alpaca adapter configuration.
#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    /// Data stream WebSocket endpoint.
    pub ws_url: String,
    /// Data REST base URL.
    pub rest_url: String,
    /// API credentials.
    pub credentials: AlpacaCredentials,
    /// Reconnect backoff tuning.
    pub backoff: BackoffConfig,
    /// Heartbeat tuning.
    pub heartbeat: HeartbeatConfig,
    /// REST request timeout.
    pub rest_timeout: std::time::Duration,
}

impl AlpacaConfig {
    /// Configuration for the free IEX feed.
    #[must_use]
    pub fn iex(credentials: AlpacaCredentials) -> Self {
        Self {
            ws_url: "wss://stream.data.alpaca.markets/v2/iex".to_string(),
            rest_url: "https://data.alpaca.markets".to_string(),
            credentials,
            backoff: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            rest_timeout: std::time::Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// US equities market data adapter backed by Alpaca.
pub struct AlpacaProvider {
    config: AlpacaConfig,
    http: reqwest::Client,
    tracker: ConnectionTracker,
    events: mpsc::Sender<ProviderEvent>,
    cancel: CancellationToken,
    /// Subscribed tickers, restored on reconnect.
    subscriptions: RwLock<BTreeSet<String>>,
    subs_changed: Notify,
}

impl AlpacaProvider {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        config: AlpacaConfig,
        events: mpsc::Sender<ProviderEvent>,
        cancel: CancellationToken,
    ) -> Result<Self, AlpacaError> {
        let http = reqwest::Client::builder()
            .timeout(config.rest_timeout)
            .build()
            .map_err(|e| AlpacaError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http,
            tracker: ConnectionTracker::new(),
            events,
            cancel,
            subscriptions: RwLock::new(BTreeSet::new()),
            subs_changed: Notify::new(),
        })
    }

    /// Run the streaming connection until shutdown, reconnecting with
    /// exponential backoff on failure.
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
                    tracing::info!("Alpaca stream closed gracefully");
                    self.tracker.disconnected();
                    return;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Alpaca stream error");
                    self.tracker.backoff(error.to_string());

                    let failures = self.tracker.retry_count().saturating_sub(1);
                    let delay = policy.delay_for(failures);
                    tracing::info!(
                        attempt = self.tracker.retry_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting to Alpaca stream"
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

    async fn connect_and_stream(&self) -> Result<(), AlpacaError> {
        tracing::info!(url = %self.config.ws_url, "Connecting to Alpaca stream");
        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(&self.config.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

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
    ) -> Result<(), AlpacaError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut authenticated = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),

                () = self.subs_changed.notified() => {
                    if authenticated {
                        self.send_subscribe(write).await?;
                    }
                }

                event = hb_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        write.send(Message::Ping(vec![].into())).await?;
                    }
                    Some(HeartbeatEvent::Timeout) => {
                        tracing::warn!("Alpaca heartbeat timeout");
                        return Err(AlpacaError::HeartbeatTimeout);
                    }
                    None => {}
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_activity();
                        self.handle_frame(&text, write, &mut authenticated).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat.record_activity(),
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Alpaca sent close frame");
                        return Err(AlpacaError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Err(error.into()),
                    None => return Err(AlpacaError::ConnectionClosed),
                },
            }
        }
    }

    async fn handle_frame<W>(
        &self,
        text: &str,
        write: &mut W,
        authenticated: &mut bool,
    ) -> Result<(), AlpacaError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let messages = match decode_frame(text) {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(error = %error, "Unrecognized Alpaca message");
                return Ok(());
            }
        };

        for message in messages {
            match message {
                StreamMessage::Success { msg } if msg == "connected" => {
                    let auth = AuthRequest {
                        action: "auth",
                        key: &self.config.credentials.key,
                        secret: &self.config.credentials.secret,
                    };
                    let json = serde_json::to_string(&auth)
                        .map_err(|e| AlpacaError::Http(format!("failed to serialize auth: {e}")))?;
                    write.send(Message::Text(json.into())).await?;
                }
                StreamMessage::Success { msg } if msg == "authenticated" => {
                    tracing::info!("Alpaca stream authenticated");
                    *authenticated = true;
                    self.tracker.connected();
                    self.send_subscribe(write).await?;
                }
                StreamMessage::Success { msg } => {
                    tracing::debug!(msg = %msg, "Alpaca success frame");
                }
                StreamMessage::Error { code, msg } => {
                    tracing::error!(code, msg = %msg, "Alpaca stream error frame");
                    if *authenticated {
                        return Err(AlpacaError::StreamError { code, msg });
                    }
                    return Err(AlpacaError::AuthenticationFailed { code, msg });
                }
                StreamMessage::Subscription { quotes, bars } => {
                    tracing::debug!(
                        quotes = quotes.len(),
                        bars = bars.len(),
                        "Alpaca subscriptions confirmed"
                    );
                }
                StreamMessage::Quote(quote) => {
                    if let Some(normalized) = quote_to_quote(&quote) {
                        let _ = self.events.send(ProviderEvent::Quote(normalized)).await;
                    }
                }
                StreamMessage::Bar(bar) => {
                    if let Ok(symbol) = Symbol::parse(&bar.symbol) {
                        let _ = self
                            .events
                            .send(ProviderEvent::Candle {
                                symbol,
                                timeframe: Timeframe::Min1,
                                candle: Candle {
                                    start_time: bar.start_time,
                                    open: bar.open,
                                    high: bar.high,
                                    low: bar.low,
                                    close: bar.close,
                                    volume: bar.volume,
                                },
                            })
                            .await;
                    }
                }
                StreamMessage::Ignored => {}
            }
        }
        Ok(())
    }

    /// Send a subscribe request for the full current symbol set.
    async fn send_subscribe<W>(&self, write: &mut W) -> Result<(), AlpacaError>
    where
        W: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    {
        let symbols: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        if symbols.is_empty() {
            return Ok(());
        }

        let request = SubscriptionRequest {
            action: "subscribe",
            quotes: symbols.clone(),
            bars: symbols,
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| AlpacaError::Http(format!("failed to serialize subscribe: {e}")))?;

        tracing::debug!(quotes = ?request.quotes, "Sending Alpaca subscribe");
        write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    fn rest_get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.config.rest_url))
            .header("APCA-API-KEY-ID", &self.config.credentials.key)
            .header("APCA-API-SECRET-KEY", &self.config.credentials.secret)
    }

    fn map_rest_status(&self, status: reqwest::StatusCode, symbol: &Symbol) -> MarketDataError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            MarketDataError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
            }
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            MarketDataError::ProviderUnavailable {
                provider: PROVIDER_NAME.to_string(),
            }
        } else {
            MarketDataError::NoData {
                symbol: symbol.to_string(),
            }
        }
    }
}

fn quote_to_quote(message: &QuoteMessage) -> Option<Quote> {
    let symbol = Symbol::parse(&message.symbol).ok()?;
    // Alpaca quote frames carry no last-trade price; use the midpoint.
    let mid = (message.bid_price + message.ask_price) / Decimal::TWO;
    Some(Quote {
        symbol,
        price: mid,
        bid: Some(message.bid_price),
        ask: Some(message.ask_price),
        timestamp: message.timestamp,
        provider: PROVIDER_NAME.to_string(),
    })
}

// =============================================================================
// MarketProvider implementation
// =============================================================================

#[async_trait]
impl MarketProvider for AlpacaProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn market_class(&self) -> MarketClass {
        MarketClass::Equity
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.tracker.snapshot()
    }

    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        {
            let mut subs = self.subscriptions.write();
            for symbol in symbols {
                subs.insert(symbol.as_str().to_string());
            }
        }
        self.subs_changed.notify_one();
        tracing::info!(symbols = ?symbols, "Alpaca subscriptions updated");
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        {
            let mut subs = self.subscriptions.write();
            for symbol in symbols {
                subs.remove(symbol.as_str());
            }
        }
        self.subs_changed.notify_one();
        Ok(())
    }

    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        let response = self
            .rest_get(&format!("/v2/stocks/{symbol}/quotes/latest"))
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(symbol = %symbol, error = %error, "Alpaca quote fetch failed");
                MarketDataError::NoData {
                    symbol: symbol.to_string(),
                }
            })?;

        if !response.status().is_success() {
            return Err(self.map_rest_status(response.status(), symbol));
        }

        let body: LatestQuoteResponse =
            response.json().await.map_err(|_| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })?;

        Ok(Quote {
            symbol: symbol.clone(),
            price: (body.quote.bid_price + body.quote.ask_price) / Decimal::TWO,
            bid: Some(body.quote.bid_price),
            ask: Some(body.quote.ask_price),
            timestamp: body.quote.timestamp,
            provider: PROVIDER_NAME.to_string(),
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: CandleRange,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let response = self
            .rest_get(&format!("/v2/stocks/{symbol}/bars"))
            .query(&[
                ("timeframe", rest_timeframe(timeframe)),
                ("start", &range.start.to_rfc3339()),
                ("end", &range.end.to_rfc3339()),
                ("limit", &BARS_LIMIT.to_string()),
            ])
            .send()
            .await
            .map_err(|error| {
                tracing::warn!(symbol = %symbol, error = %error, "Alpaca bars fetch failed");
                MarketDataError::NoData {
                    symbol: symbol.to_string(),
                }
            })?;

        if !response.status().is_success() {
            return Err(self.map_rest_status(response.status(), symbol));
        }

        let body: BarsResponse =
            response.json().await.map_err(|_| MarketDataError::NoData {
                symbol: symbol.to_string(),
            })?;

        Ok(body
            .bars
            .into_iter()
            .map(|bar| Candle {
                start_time: bar.start_time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn credentials() -> AlpacaCredentials {
        AlpacaCredentials::new("key123".to_string(), "secret456".to_string())
    }

    #[test]
    fn credentials_redacted_in_debug() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn control_frames_decode() {
        let frames = decode_frame(r#"[{"T":"success","msg":"connected"}]"#).unwrap();
        assert!(matches!(&frames[0], StreamMessage::Success { msg } if msg == "connected"));

        let frames = decode_frame(r#"[{"T":"error","code":402,"msg":"auth failed"}]"#).unwrap();
        assert!(matches!(frames[0], StreamMessage::Error { code: 402, .. }));
    }

    #[test]
    fn quote_frame_decodes_to_midpoint_quote() {
        let frames = decode_frame(
            r#"[{"T":"q","S":"AAPL","bp":190.10,"ap":190.14,"bs":2,"as":3,
                 "t":"2024-01-05T15:30:00Z","c":["R"],"z":"C"}]"#,
        )
        .unwrap();

        let StreamMessage::Quote(quote) = &frames[0] else {
            panic!("expected quote");
        };
        let normalized = quote_to_quote(quote).unwrap();
        assert_eq!(normalized.symbol.as_str(), "AAPL");
        assert_eq!(normalized.price, Decimal::from_str("190.12").unwrap());
        assert_eq!(normalized.bid, Some(Decimal::from_str("190.10").unwrap()));
        assert_eq!(normalized.provider, "alpaca");
    }

    #[test]
    fn bar_frame_decodes() {
        let frames = decode_frame(
            r#"[{"T":"b","S":"MSFT","o":400.0,"h":401.5,"l":399.0,"c":401.0,
                 "v":12345,"t":"2024-01-05T15:30:00Z","n":100,"vw":400.7}]"#,
        )
        .unwrap();
        assert!(matches!(&frames[0], StreamMessage::Bar(bar) if bar.symbol == "MSFT"));
    }

    #[test]
    fn unknown_frame_types_are_ignored_not_fatal() {
        let frames =
            decode_frame(r#"[{"T":"t","S":"AAPL","p":190.0,"s":10,"t":"2024-01-05T15:30:00Z"}]"#)
                .unwrap();
        assert!(matches!(frames[0], StreamMessage::Ignored));
    }

    #[test]
    fn mixed_array_decodes_every_element() {
        let frames = decode_frame(
            r#"[{"T":"subscription","quotes":["AAPL"],"bars":[]},
                {"T":"q","S":"AAPL","bp":1.0,"ap":2.0,"t":"2024-01-05T15:30:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn rest_timeframe_mapping() {
        assert_eq!(rest_timeframe(Timeframe::Min1), "1Min");
        assert_eq!(rest_timeframe(Timeframe::Hour1), "1Hour");
        assert_eq!(rest_timeframe(Timeframe::Day1), "1Day");
    }

    #[test]
    fn iex_config_points_at_production() {
        let config = AlpacaConfig::iex(credentials());
        assert_eq!(config.ws_url, "wss://stream.data.alpaca.markets/v2/iex");
        assert_eq!(config.rest_url, "https://data.alpaca.markets");
    }

    #[tokio::test]
    async fn subscribe_tracks_symbols() {
        let (tx, _rx) = mpsc::channel(8);
        let provider = AlpacaProvider::new(
            AlpacaConfig::iex(credentials()),
            tx,
            CancellationToken::new(),
        )
        .unwrap();

        provider
            .subscribe(&[
                Symbol::parse("AAPL").unwrap(),
                Symbol::parse("MSFT").unwrap(),
            ])
            .await
            .unwrap();
        assert_eq!(provider.subscriptions.read().len(), 2);

        provider
            .unsubscribe(&[Symbol::parse("AAPL").unwrap()])
            .await
            .unwrap();
        let subs = provider.subscriptions.read().clone();
        assert!(!subs.contains("AAPL"));
        assert!(subs.contains("MSFT"));
    }
}
