//! Technical Indicator Engine
//!
//! Pure, stateless computation over candle series. Standard formulas only;
//! callers decide which indicators to compute and how to interpret them.
//! Every function returns `None` when the series is too short.

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use super::market::Candle;

/// Standard RSI period.
const RSI_PERIOD: usize = 14;
/// Standard ATR period.
const ATR_PERIOD: usize = 14;
/// Standard Bollinger band period / width.
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD: f64 = 2.0;

// =============================================================================
// Indicator selection
// =============================================================================

/// An indicator the agent can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    /// Relative Strength Index (14).
    Rsi,
    /// MACD (12, 26, 9).
    Macd,
    /// Bollinger bands (20, 2σ).
    Bollinger,
    /// Simple moving averages (20 / 50 / 200).
    Sma,
    /// Exponential moving averages (12 / 26).
    Ema,
    /// Average True Range (14).
    Atr,
    /// Everything above.
    All,
}

// =============================================================================
// Outputs
// =============================================================================

/// MACD line, signal line, and histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdOutput {
    /// Fast EMA minus slow EMA.
    pub macd: f64,
    /// EMA of the MACD line.
    pub signal: f64,
    /// MACD minus signal.
    pub histogram: f64,
}

/// Bollinger band levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerOutput {
    /// Middle band (SMA).
    pub middle: f64,
    /// Upper band.
    pub upper: f64,
    /// Lower band.
    pub lower: f64,
}

/// Moving average set keyed by period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MovingAverages {
    /// 20-period value.
    pub p20: Option<f64>,
    /// 50-period value.
    pub p50: Option<f64>,
    /// 200-period value.
    pub p200: Option<f64>,
}

/// Computed indicator values for one series, `None` where the series was
/// too short.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorReport {
    /// RSI(14).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi: Option<f64>,
    /// MACD(12, 26, 9).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macd: Option<MacdOutput>,
    /// Bollinger(20, 2σ).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger: Option<BollingerOutput>,
    /// SMA set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma: Option<MovingAverages>,
    /// EMA(12) and EMA(26).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema12: Option<f64>,
    /// EMA(26).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema26: Option<f64>,
    /// ATR(14).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr: Option<f64>,
    /// Coarse buy/sell/neutral readings derived from the values above.
    pub signals: Vec<SignalReading>,
}

/// One derived signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalReading {
    /// Indicator the signal came from.
    pub source: &'static str,
    /// `bullish`, `bearish`, or `neutral`.
    pub direction: &'static str,
    /// Short human-readable rationale.
    pub note: String,
}

// =============================================================================
// Report entry point
// =============================================================================

/// Compute the requested indicators over a candle series.
///
/// The series must be in ascending start-time order, which is what the data
/// manager's cache guarantees.
#[must_use]
pub fn report(candles: &[Candle], requested: &[IndicatorKind]) -> IndicatorReport {
    let closes: Vec<f64> = candles.iter().map(|c| decimal_to_f64(c.close)).collect();
    let all = requested.contains(&IndicatorKind::All);
    let wants = |kind: IndicatorKind| all || requested.contains(&kind);

    let mut out = IndicatorReport::default();

    if wants(IndicatorKind::Rsi) {
        out.rsi = rsi(&closes, RSI_PERIOD);
    }
    if wants(IndicatorKind::Macd) {
        out.macd = macd(&closes, 12, 26, 9);
    }
    if wants(IndicatorKind::Bollinger) {
        out.bollinger = bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_STD);
    }
    if wants(IndicatorKind::Sma) {
        out.sma = Some(MovingAverages {
            p20: sma(&closes, 20),
            p50: sma(&closes, 50),
            p200: sma(&closes, 200),
        });
    }
    if wants(IndicatorKind::Ema) {
        out.ema12 = ema(&closes, 12);
        out.ema26 = ema(&closes, 26);
    }
    if wants(IndicatorKind::Atr) {
        out.atr = atr(candles, ATR_PERIOD);
    }

    let signals = derive_signals(&out, closes.last().copied());
    out.signals = signals;
    out
}

/// Derive coarse signals from computed values.
fn derive_signals(report: &IndicatorReport, last_close: Option<f64>) -> Vec<SignalReading> {
    let mut signals = Vec::new();

    if let Some(rsi) = report.rsi {
        let (direction, note) = if rsi >= 70.0 {
            ("bearish", format!("RSI {rsi:.1} is overbought"))
        } else if rsi <= 30.0 {
            ("bullish", format!("RSI {rsi:.1} is oversold"))
        } else {
            ("neutral", format!("RSI {rsi:.1} is mid-range"))
        };
        signals.push(SignalReading {
            source: "rsi",
            direction,
            note,
        });
    }

    if let Some(macd) = report.macd {
        let direction = if macd.histogram > 0.0 {
            "bullish"
        } else if macd.histogram < 0.0 {
            "bearish"
        } else {
            "neutral"
        };
        signals.push(SignalReading {
            source: "macd",
            direction,
            note: format!("MACD histogram {:.4}", macd.histogram),
        });
    }

    if let (Some(bands), Some(close)) = (report.bollinger, last_close) {
        let (direction, note) = if close >= bands.upper {
            ("bearish", format!("close {close:.2} above upper band"))
        } else if close <= bands.lower {
            ("bullish", format!("close {close:.2} below lower band"))
        } else {
            ("neutral", format!("close {close:.2} inside bands"))
        };
        signals.push(SignalReading {
            source: "bollinger",
            direction,
            note,
        });
    }

    signals
}

// =============================================================================
// Formulas
// =============================================================================

/// Simple moving average of the trailing `period` values.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Exponential moving average, seeded with an SMA over the first period.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let k = 2.0 / (period as f64 + 1.0);
    #[allow(clippy::cast_precision_loss)]
    let mut current = values[..period].iter().sum::<f64>() / period as f64;

    for value in &values[period..] {
        current = value.mul_add(k, current * (1.0 - k));
    }

    Some(current)
}

/// Relative Strength Index using Wilder's smoothing.
#[must_use]
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let (mut avg_gain, mut avg_loss) = changes
        .iter()
        .take(period)
        .fold((0.0_f64, 0.0_f64), |(gain, loss), &change| {
            if change > 0.0 {
                (gain + change, loss)
            } else {
                (gain, loss - change)
            }
        });

    #[allow(clippy::cast_precision_loss)]
    let n = period as f64;
    avg_gain /= n;
    avg_loss /= n;

    for &change in changes.iter().skip(period) {
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    if avg_loss == 0.0 {
        Some(100.0)
    } else {
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// MACD line, signal line, and histogram.
#[must_use]
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdOutput> {
    if values.len() < slow + signal {
        return None;
    }

    // MACD line at each point once the slow EMA is defined.
    let macd_series: Vec<f64> = (slow..=values.len())
        .filter_map(|i| {
            let slice = &values[..i];
            Some(ema(slice, fast)? - ema(slice, slow)?)
        })
        .collect();

    let signal_line = ema(&macd_series, signal)?;
    let macd_line = *macd_series.last()?;

    Some(MacdOutput {
        macd: macd_line,
        signal: signal_line,
        histogram: macd_line - signal_line,
    })
}

/// Bollinger bands around an SMA.
#[must_use]
pub fn bollinger(values: &[f64], period: usize, std_mult: f64) -> Option<BollingerOutput> {
    let middle = sma(values, period)?;

    let window = &values[values.len() - period..];
    #[allow(clippy::cast_precision_loss)]
    let variance =
        window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    Some(BollingerOutput {
        middle,
        upper: std_mult.mul_add(std_dev, middle),
        lower: std_mult.mul_add(-std_dev, middle),
    })
}

/// Average True Range with Wilder's smoothing.
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let high = decimal_to_f64(w[1].high);
            let low = decimal_to_f64(w[1].low);
            let prev_close = decimal_to_f64(w[0].close);
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let n = period as f64;
    let mut current = true_ranges.iter().take(period).sum::<f64>() / n;
    for tr in true_ranges.iter().skip(period) {
        current = (current * (n - 1.0) + tr) / n;
    }

    Some(current)
}

fn decimal_to_f64(value: rust_decimal::Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::*;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let price = Decimal::try_from(close).unwrap();
                Candle {
                    start_time: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
                    open: price,
                    high: price + Decimal::ONE,
                    low: price - Decimal::ONE,
                    close: price,
                    volume: Decimal::from(1_000),
                }
            })
            .collect()
    }

    #[test]
    fn sma_of_constant_series() {
        let values = vec![10.0; 30];
        assert_eq!(sma(&values, 20), Some(10.0));
    }

    #[test]
    fn sma_short_series_is_none() {
        assert_eq!(sma(&[1.0, 2.0], 20), None);
    }

    #[test]
    fn ema_tracks_trend_above_sma() {
        // Rising series: EMA weights recent values more than SMA does.
        let values: Vec<f64> = (1..=50).map(f64::from).collect();
        let ema_val = ema(&values, 10).unwrap();
        let sma_val = sma(&values, 10).unwrap();
        assert!(ema_val > sma_val - 1.0);
        assert!(ema_val <= 50.0);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values: Vec<f64> = (1..=30).map(f64::from).collect();
        let rsi_val = rsi(&values, 14).unwrap();
        assert!((rsi_val - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let values: Vec<f64> = (1..=30).rev().map(f64::from).collect();
        let rsi_val = rsi(&values, 14).unwrap();
        assert!(rsi_val < 1e-9);
    }

    #[test]
    fn rsi_flat_series_insufficient_data() {
        assert_eq!(rsi(&[1.0; 10], 14), None);
    }

    #[test]
    fn macd_constant_series_is_zero() {
        let values = vec![50.0; 60];
        let out = macd(&values, 12, 26, 9).unwrap();
        assert!(out.macd.abs() < 1e-9);
        assert!(out.signal.abs() < 1e-9);
        assert!(out.histogram.abs() < 1e-9);
    }

    #[test]
    fn bollinger_constant_series_collapses() {
        let values = vec![25.0; 25];
        let bands = bollinger(&values, 20, 2.0).unwrap();
        assert!((bands.middle - 25.0).abs() < f64::EPSILON);
        assert!((bands.upper - 25.0).abs() < f64::EPSILON);
        assert!((bands.lower - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn atr_reflects_bar_ranges() {
        let candles = candles_from_closes(&[10.0; 20]);
        // Every bar has high-low = 2.0 and no gaps.
        let atr_val = atr(&candles, 14).unwrap();
        assert!((atr_val - 2.0).abs() < 1e-9);
    }

    #[test]
    fn report_all_computes_everything() {
        let closes: Vec<f64> = (1..=60).map(|i| 100.0 + f64::from(i).sin() * 5.0).collect();
        let candles = candles_from_closes(&closes);

        let out = report(&candles, &[IndicatorKind::All]);
        assert!(out.rsi.is_some());
        assert!(out.macd.is_some());
        assert!(out.bollinger.is_some());
        assert!(out.sma.is_some());
        assert!(out.ema12.is_some());
        assert!(out.atr.is_some());
        assert!(!out.signals.is_empty());
    }

    #[test]
    fn report_subset_skips_others() {
        let candles = candles_from_closes(&(1..=60).map(f64::from).collect::<Vec<_>>());
        let out = report(&candles, &[IndicatorKind::Rsi]);
        assert!(out.rsi.is_some());
        assert!(out.macd.is_none());
        assert!(out.bollinger.is_none());
    }

    #[test]
    fn report_short_series_degrades_to_none() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        let out = report(&candles, &[IndicatorKind::All]);
        assert!(out.rsi.is_none());
        assert!(out.macd.is_none());
        // SMA struct exists but every period is None.
        let sma_set = out.sma.unwrap();
        assert!(sma_set.p20.is_none());
        assert!(sma_set.p200.is_none());
    }

    #[test]
    fn overbought_rsi_reads_bearish() {
        let closes: Vec<f64> = (1..=40).map(f64::from).collect();
        let out = report(&candles_from_closes(&closes), &[IndicatorKind::Rsi]);
        let signal = out.signals.iter().find(|s| s.source == "rsi").unwrap();
        assert_eq!(signal.direction, "bearish");
    }
}
