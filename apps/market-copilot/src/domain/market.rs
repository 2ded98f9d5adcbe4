//! Market Data Types
//!
//! Core domain types for market data: symbols, quotes, and candles.
//! These types are vendor-agnostic and represent the canonical internal
//! representation shared by every provider adapter.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Market class a symbol trades in.
///
/// Routing in the data manager is by market class: each class is owned by
/// exactly one provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketClass {
    /// US equities (e.g. `AAPL`).
    Equity,
    /// Crypto pairs (e.g. `BTC-USD`).
    Crypto,
}

impl MarketClass {
    /// Get the class name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Crypto => "crypto",
        }
    }
}

/// Error constructing a [`Symbol`].
#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    /// Symbol string was empty.
    #[error("symbol cannot be empty")]
    Empty,
    /// Symbol contained characters outside `[A-Z0-9.-]`.
    #[error("symbol {0:?} contains invalid characters")]
    InvalidChars(String),
}

/// A validated market symbol with its market class.
///
/// Immutable once created. Crypto pairs use the `BASE-QUOTE` form
/// (`BTC-USD`); everything else is treated as an equity ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Parse and validate a symbol, normalizing to uppercase.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        let upper = trimmed.to_uppercase();
        if !upper
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(SymbolError::InvalidChars(upper));
        }

        Ok(Self(upper))
    }

    /// The symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Market class inferred from the symbol's shape.
    #[must_use]
    pub fn market_class(&self) -> MarketClass {
        if self.0.contains('-') {
            MarketClass::Crypto
        } else {
            MarketClass::Equity
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle aggregation interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// One minute.
    #[serde(rename = "1m")]
    Min1,
    /// Five minutes.
    #[serde(rename = "5m")]
    Min5,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    Min15,
    /// One hour.
    #[serde(rename = "1h")]
    Hour1,
    /// Four hours.
    #[serde(rename = "4h")]
    Hour4,
    /// One day.
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    /// All supported timeframes.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Min1,
            Self::Min5,
            Self::Min15,
            Self::Hour1,
            Self::Hour4,
            Self::Day1,
        ]
    }

    /// Canonical short name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    /// Parse from the canonical short name, case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "1m" => Some(Self::Min1),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    /// Interval covered by one candle.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Self::Min1 => chrono::Duration::minutes(1),
            Self::Min5 => chrono::Duration::minutes(5),
            Self::Min15 => chrono::Duration::minutes(15),
            Self::Hour1 => chrono::Duration::hours(1),
            Self::Hour4 => chrono::Duration::hours(4),
            Self::Day1 => chrono::Duration::days(1),
        }
    }
}

// =============================================================================
// Quote
// =============================================================================

/// A point-in-time price observation for a symbol.
///
/// Only the most recent quote per symbol is retained by the cache;
/// superseded quotes are discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// The quoted symbol.
    pub symbol: Symbol,
    /// Last traded or mid price.
    pub price: Decimal,
    /// Best bid, if the vendor reports one.
    pub bid: Option<Decimal>,
    /// Best ask, if the vendor reports one.
    pub ask: Option<Decimal>,
    /// Vendor-reported observation time.
    pub timestamp: DateTime<Utc>,
    /// Name of the provider that produced this quote.
    pub provider: String,
}

// =============================================================================
// Candle
// =============================================================================

/// One OHLCV bar.
///
/// The owning series supplies the symbol and timeframe; within a series the
/// uniqueness key is `start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time (UTC).
    pub start_time: DateTime<Utc>,
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume over the bar.
    pub volume: Decimal,
}

/// Inclusive time range for candle queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleRange {
    /// Earliest bar start wanted.
    pub start: DateTime<Utc>,
    /// Latest bar start wanted.
    pub end: DateTime<Utc>,
}

impl CandleRange {
    /// Range covering the last `count` bars of `timeframe`, ending now.
    #[must_use]
    pub fn lookback(timeframe: Timeframe, count: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - timeframe.duration() * i32::try_from(count).unwrap_or(i32::MAX),
            end: now,
        }
    }

    /// Check whether a bar start falls inside the range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

// =============================================================================
// Tests
// =============================================================================
