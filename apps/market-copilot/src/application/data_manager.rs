//! Data Manager
//!
//! Provider-agnostic access to live and historical market data. Owns the set
//! of provider adapters, routes each symbol to the adapter that owns its
//! market class, and maintains the in-memory quote and candle caches.
//!
//! # Concurrency
//!
//! Adapters emit [`ProviderEvent`]s into a bounded channel; a single writer
//! task drains it and applies mutations, so vendor callbacks never touch the
//! cache directly. Quotes live in per-symbol shards, candles behind one map
//! lock. Readers (tools, HTTP handlers) only ever take read locks.
//!
//! # Ordering
//!
//! Quotes for a symbol are applied in non-decreasing timestamp order only;
//! a late tick from a flaky stream is dropped, never regresses the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::ports::{MarketDataError, MarketProvider, ProviderEvent};
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::market::{Candle, CandleRange, MarketClass, Quote, Symbol, Timeframe};

/// Capacity of the provider event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 4096;

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for the data manager.
#[derive(Debug, Clone)]
pub struct DataManagerConfig {
    /// How long `latest_quote` waits for a first tick from a connected
    /// adapter before falling back to a REST fetch.
    pub quote_wait: Duration,
}

impl Default for DataManagerConfig {
    fn default() -> Self {
        Self {
            quote_wait: Duration::from_secs(2),
        }
    }
}

// =============================================================================
// Cache shards
// =============================================================================

/// Per-symbol quote shard: the latest quote plus a wakeup for first-tick
/// waiters.
#[derive(Debug, Default)]
struct QuoteShard {
    quote: RwLock<Option<Quote>>,
    arrived: Notify,
}

type SeriesKey = (Symbol, Timeframe);

// =============================================================================
// Provider status view
// =============================================================================

/// Status of one adapter, for the health endpoint and UI.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStatusView {
    /// Adapter name.
    pub name: &'static str,
    /// Market class the adapter owns.
    pub market_class: MarketClass,
    /// Connection snapshot.
    pub connection: ConnectionStatus,
}

// =============================================================================
// Data Manager
// =============================================================================

/// Orchestrates provider adapters and the unified market data cache.
pub struct DataManager {
    config: DataManagerConfig,
    providers: HashMap<MarketClass, Arc<dyn MarketProvider>>,
    quote_shards: RwLock<HashMap<Symbol, Arc<QuoteShard>>>,
    candle_series: RwLock<HashMap<SeriesKey, Vec<Candle>>>,
}

impl DataManager {
    /// Create a manager over the given adapters.
    ///
    /// When two adapters claim the same market class the later one wins;
    /// symbol routing therefore always has a single owner.
    #[must_use]
    pub fn new(config: DataManagerConfig, providers: Vec<Arc<dyn MarketProvider>>) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.market_class(), p))
            .collect();

        Self {
            config,
            providers,
            quote_shards: RwLock::new(HashMap::new()),
            candle_series: RwLock::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Event writer
    // =========================================================================

    /// Drain provider events and apply them to the cache until the channel
    /// closes or shutdown is requested.
    ///
    /// This is the sole mutation path for live data; spawn exactly one.
    pub async fn run_writer(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ProviderEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Cache writer shutting down");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.apply_event(event),
                        None => {
                            tracing::info!("Provider event channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn apply_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::Quote(quote) => self.apply_quote(quote),
            ProviderEvent::Candle {
                symbol,
                timeframe,
                candle,
            } => {
                self.merge_candles(&symbol, timeframe, vec![candle]);
            }
        }
    }

    /// Apply one quote, enforcing the monotonic timestamp rule.
    fn apply_quote(&self, quote: Quote) {
        let shard = self.quote_shard(&quote.symbol);
        {
            let mut cached = shard.quote.write();
            if let Some(existing) = cached.as_ref()
                && existing.timestamp > quote.timestamp
            {
                tracing::trace!(
                    symbol = %quote.symbol,
                    cached_ts = %existing.timestamp,
                    stale_ts = %quote.timestamp,
                    "Dropping out-of-order quote"
                );
                metrics::counter!("copilot_quotes_dropped_total").increment(1);
                return;
            }
            *cached = Some(quote);
        }
        metrics::counter!("copilot_quotes_applied_total").increment(1);
        shard.arrived.notify_waiters();
    }

    /// Merge candles into a series, deduplicated by start time.
    ///
    /// Idempotent: merging the same batch twice leaves the series unchanged.
    /// A bar with an already-known start time replaces the stored one, which
    /// lets streamed bar updates refine an earlier backfill.
    fn merge_candles(&self, symbol: &Symbol, timeframe: Timeframe, fetched: Vec<Candle>) {
        if fetched.is_empty() {
            return;
        }

        let mut cache = self.candle_series.write();
        let series = cache
            .entry((symbol.clone(), timeframe))
            .or_default();

        let mut merged = 0_u64;
        for candle in fetched {
            match series.binary_search_by_key(&candle.start_time, |c| c.start_time) {
                Ok(pos) => series[pos] = candle,
                Err(pos) => {
                    series.insert(pos, candle);
                    merged += 1;
                }
            }
        }
        metrics::counter!("copilot_candles_merged_total").increment(merged);
    }

    // =========================================================================
    // Query surface
    // =========================================================================

    /// Most recent quote for a symbol.
    ///
    /// Cache first; if empty and the owning adapter is Connected, waits a
    /// bounded time for the first tick, then falls back to the adapter's
    /// one-shot REST fetch. An adapter in Backoff or Disconnected yields
    /// `ProviderUnavailable` without waiting.
    pub async fn latest_quote(&self, symbol: &Symbol) -> Result<Quote, MarketDataError> {
        let shard = self.quote_shard(symbol);
        if let Some(quote) = shard.quote.read().clone() {
            return Ok(quote);
        }

        let provider = self.provider_for(symbol)?;
        match provider.connection_status().state {
            ConnectionState::Connected => {
                // Register the waiter before re-checking so a tick landing
                // between the check and the wait is not lost.
                let notified = shard.arrived.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(quote) = shard.quote.read().clone() {
                    return Ok(quote);
                }

                match tokio::time::timeout(self.config.quote_wait, notified).await {
                    Ok(()) => shard
                        .quote
                        .read()
                        .clone()
                        .ok_or_else(|| MarketDataError::NoData {
                            symbol: symbol.to_string(),
                        }),
                    Err(_) => provider.fetch_quote(symbol).await,
                }
            }
            ConnectionState::Connecting => provider.fetch_quote(symbol).await,
            ConnectionState::Backoff | ConnectionState::Disconnected => {
                Err(MarketDataError::ProviderUnavailable {
                    provider: provider.name().to_string(),
                })
            }
        }
    }

    /// Candles for a symbol over a range, oldest first.
    ///
    /// Serves the in-memory series, backfilling over REST when the requested
    /// range starts before the earliest cached bar. If the backfill fails
    /// but cached bars cover part of the range, the cached bars are served.
    pub async fn candles(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: CandleRange,
    ) -> Result<Vec<Candle>, MarketDataError> {
        let needs_backfill = {
            let cache = self.candle_series.read();
            cache
                .get(&(symbol.clone(), timeframe))
                .and_then(|series| series.first())
                .is_none_or(|earliest| earliest.start_time > range.start)
        };

        if needs_backfill {
            let provider = self.provider_for(symbol)?;
            match provider.fetch_candles(symbol, timeframe, range).await {
                Ok(fetched) => self.merge_candles(symbol, timeframe, fetched),
                Err(error) => {
                    if self.cached_in_range(symbol, timeframe, range).is_empty() {
                        return Err(error);
                    }
                    tracing::warn!(
                        symbol = %symbol,
                        timeframe = timeframe.as_str(),
                        error = %error,
                        "Backfill failed, serving cached candles"
                    );
                }
            }
        }

        let result = self.cached_in_range(symbol, timeframe, range);
        if result.is_empty() {
            return Err(MarketDataError::NoData {
                symbol: symbol.to_string(),
            });
        }
        Ok(result)
    }

    /// Subscribe symbols on their owning adapters.
    ///
    /// Symbols whose market class has no configured adapter are skipped with
    /// a warning, so one missing vendor credential does not take down the
    /// rest of the watch list.
    pub async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        for (class, group) in group_by_class(symbols) {
            match self.providers.get(&class) {
                Some(provider) => provider.subscribe(&group).await?,
                None => {
                    tracing::warn!(
                        market_class = class.as_str(),
                        symbols = ?group,
                        "No provider configured for market class, skipping subscribe"
                    );
                }
            }
        }
        Ok(())
    }

    /// Unsubscribe symbols on their owning adapters.
    pub async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), MarketDataError> {
        for (class, group) in group_by_class(symbols) {
            if let Some(provider) = self.providers.get(&class) {
                provider.unsubscribe(&group).await?;
            }
        }
        Ok(())
    }

    /// Connection snapshots of every adapter.
    #[must_use]
    pub fn provider_statuses(&self) -> Vec<ProviderStatusView> {
        let mut statuses: Vec<_> = self
            .providers
            .values()
            .map(|p| ProviderStatusView {
                name: p.name(),
                market_class: p.market_class(),
                connection: p.connection_status(),
            })
            .collect();
        statuses.sort_by_key(|s| s.name);
        statuses
    }

    /// All currently cached quotes.
    #[must_use]
    pub fn cached_quotes(&self) -> Vec<Quote> {
        let shards = self.quote_shards.read();
        let mut quotes: Vec<Quote> = shards
            .values()
            .filter_map(|shard| shard.quote.read().clone())
            .collect();
        quotes.sort_by(|a, b| a.symbol.as_str().cmp(b.symbol.as_str()));
        quotes
    }

    /// Whether at least one adapter is currently connected.
    #[must_use]
    pub fn any_connected(&self) -> bool {
        self.providers
            .values()
            .any(|p| p.connection_status().state == ConnectionState::Connected)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn quote_shard(&self, symbol: &Symbol) -> Arc<QuoteShard> {
        if let Some(shard) = self.quote_shards.read().get(symbol) {
            return Arc::clone(shard);
        }
        let mut shards = self.quote_shards.write();
        Arc::clone(shards.entry(symbol.clone()).or_default())
    }

    fn provider_for(&self, symbol: &Symbol) -> Result<&Arc<dyn MarketProvider>, MarketDataError> {
        let class = symbol.market_class();
        self.providers
            .get(&class)
            .ok_or_else(|| MarketDataError::ProviderUnavailable {
                provider: class.as_str().to_string(),
            })
    }

    fn cached_in_range(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        range: CandleRange,
    ) -> Vec<Candle> {
        let cache = self.candle_series.read();
        cache
            .get(&(symbol.clone(), timeframe))
            .map(|series| {
                series
                    .iter()
                    .filter(|c| range.contains(c.start_time))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn group_by_class(symbols: &[Symbol]) -> HashMap<MarketClass, Vec<Symbol>> {
    let mut groups: HashMap<MarketClass, Vec<Symbol>> = HashMap::new();
    for symbol in symbols {
        groups
            .entry(symbol.market_class())
            .or_default()
            .push(symbol.clone());
    }
    groups
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::connection::ConnectionTracker;

    struct FakeProvider {
        name: &'static str,
        class: MarketClass,
        tracker: ConnectionTracker,
        rest_quote: Option<Quote>,
        rest_candles: Result<Vec<Candle>, MarketDataError>,
    }

    impl FakeProvider {
        fn new(name: &'static str, class: MarketClass) -> Self {
            Self {
                name,
                class,
                tracker: ConnectionTracker::new(),
                rest_quote: None,
                rest_candles: Ok(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MarketProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
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
            self.rest_quote
                .clone()
                .ok_or_else(|| MarketDataError::NoData {
                    symbol: symbol.to_string(),
                })
        }

        async fn fetch_candles(
            &self,
            _symbol: &Symbol,
            _timeframe: Timeframe,
            _range: CandleRange,
        ) -> Result<Vec<Candle>, MarketDataError> {
            self.rest_candles.clone()
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn quote(symbol: &str, price: i64, ts_secs: i64) -> Quote {
        Quote {
            symbol: sym(symbol),
            price: Decimal::from(price),
            bid: None,
            ask: None,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            provider: "fake".to_string(),
        }
    }

    fn candle(ts_secs: i64, close: i64) -> Candle {
        Candle {
            start_time: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            open: Decimal::from(close),
            high: Decimal::from(close + 1),
            low: Decimal::from(close - 1),
            close: Decimal::from(close),
            volume: Decimal::from(100),
        }
    }

    fn manager_with(provider: FakeProvider) -> DataManager {
        DataManager::new(DataManagerConfig::default(), vec![Arc::new(provider)])
    }

    #[test]
    fn out_of_order_quote_is_dropped() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));

        manager.apply_quote(quote("AAPL", 190, 1_000));
        manager.apply_quote(quote("AAPL", 100, 500));

        let cached = manager.cached_quotes();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].price, Decimal::from(190));
    }

    #[test]
    fn equal_timestamp_quote_is_applied() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));

        manager.apply_quote(quote("AAPL", 190, 1_000));
        manager.apply_quote(quote("AAPL", 191, 1_000));

        assert_eq!(manager.cached_quotes()[0].price, Decimal::from(191));
    }

    #[test]
    fn candle_merge_is_idempotent() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));
        let batch = vec![candle(100, 10), candle(200, 11), candle(300, 12)];

        manager.merge_candles(&sym("AAPL"), Timeframe::Day1, batch.clone());
        manager.merge_candles(&sym("AAPL"), Timeframe::Day1, batch);

        let range = CandleRange {
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        let series = manager.cached_in_range(&sym("AAPL"), Timeframe::Day1, range);
        assert_eq!(series.len(), 3);
        assert!(series.windows(2).all(|w| w[0].start_time < w[1].start_time));
    }

    #[test]
    fn candle_merge_interleaves_sorted() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));

        manager.merge_candles(&sym("AAPL"), Timeframe::Day1, vec![candle(200, 11)]);
        manager.merge_candles(
            &sym("AAPL"),
            Timeframe::Day1,
            vec![candle(300, 12), candle(100, 10)],
        );

        let range = CandleRange {
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        let series = manager.cached_in_range(&sym("AAPL"), Timeframe::Day1, range);
        let times: Vec<i64> = series.iter().map(|c| c.start_time.timestamp()).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[tokio::test]
    async fn cached_quote_served_without_provider_touch() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));
        manager.apply_quote(quote("AAPL", 190, 1_000));

        let result = manager.latest_quote(&sym("AAPL")).await.unwrap();
        assert_eq!(result.price, Decimal::from(190));
    }

    #[tokio::test]
    async fn backoff_adapter_yields_provider_unavailable() {
        let provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.tracker.connecting();
        provider.tracker.backoff("stream error");
        let manager = manager_with(provider);

        let err = manager.latest_quote(&sym("AAPL")).await.unwrap_err();
        assert_eq!(
            err,
            MarketDataError::ProviderUnavailable {
                provider: "fake".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_provider_yields_provider_unavailable() {
        let manager = manager_with(FakeProvider::new("fake", MarketClass::Equity));

        let err = manager.latest_quote(&sym("BTC-USD")).await.unwrap_err();
        assert!(matches!(err, MarketDataError::ProviderUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn connected_adapter_waits_for_first_tick() {
        let provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.tracker.connecting();
        provider.tracker.connected();
        let manager = Arc::new(manager_with(provider));

        let reader = Arc::clone(&manager);
        let handle = tokio::spawn(async move { reader.latest_quote(&sym("AAPL")).await });

        // Let the reader register its waiter, then deliver the first tick.
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.apply_quote(quote("AAPL", 190, 1_000));

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.price, Decimal::from(190));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_falls_back_to_rest_fetch() {
        let mut provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.tracker.connecting();
        provider.tracker.connected();
        provider.rest_quote = Some(quote("AAPL", 188, 900));
        let manager = manager_with(provider);

        let result = manager.latest_quote(&sym("AAPL")).await.unwrap();
        assert_eq!(result.price, Decimal::from(188));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_without_rest_yields_no_data() {
        let provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.tracker.connecting();
        provider.tracker.connected();
        let manager = manager_with(provider);

        let err = manager.latest_quote(&sym("AAPL")).await.unwrap_err();
        assert!(matches!(err, MarketDataError::NoData { .. }));
    }

    #[tokio::test]
    async fn backfill_merges_and_filters_to_range() {
        let mut provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.rest_candles = Ok(vec![candle(100, 10), candle(200, 11), candle(5_000, 12)]);
        let manager = manager_with(provider);

        let range = CandleRange {
            start: Utc.timestamp_opt(50, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        let series = manager
            .candles(&sym("AAPL"), Timeframe::Hour1, range)
            .await
            .unwrap();

        // The bar outside the range is cached but not returned.
        assert_eq!(series.len(), 2);
    }

    #[tokio::test]
    async fn backfill_failure_with_cached_bars_serves_cache() {
        let mut provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.rest_candles = Err(MarketDataError::RateLimited {
            provider: "fake".to_string(),
        });
        let manager = manager_with(provider);
        manager.merge_candles(&sym("AAPL"), Timeframe::Hour1, vec![candle(500, 10)]);

        let range = CandleRange {
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        let series = manager
            .candles(&sym("AAPL"), Timeframe::Hour1, range)
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
    }

    #[tokio::test]
    async fn backfill_failure_without_cache_propagates() {
        let mut provider = FakeProvider::new("fake", MarketClass::Equity);
        provider.rest_candles = Err(MarketDataError::RateLimited {
            provider: "fake".to_string(),
        });
        let manager = manager_with(provider);

        let range = CandleRange {
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        let err = manager
            .candles(&sym("AAPL"), Timeframe::Hour1, range)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn writer_task_applies_events_until_channel_closes() {
        let manager = Arc::new(manager_with(FakeProvider::new("fake", MarketClass::Equity)));
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(Arc::clone(&manager).run_writer(rx, cancel));

        tx.send(ProviderEvent::Quote(quote("AAPL", 190, 1_000)))
            .await
            .unwrap();
        tx.send(ProviderEvent::Candle {
            symbol: sym("AAPL"),
            timeframe: Timeframe::Min1,
            candle: candle(60, 190),
        })
        .await
        .unwrap();

        // Closing the channel lets the writer drain what is queued and exit.
        drop(tx);
        writer.await.unwrap();

        assert_eq!(manager.cached_quotes().len(), 1);
        let range = CandleRange {
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(1_000, 0).unwrap(),
        };
        assert_eq!(
            manager
                .cached_in_range(&sym("AAPL"), Timeframe::Min1, range)
                .len(),
            1
        );
    }
}
