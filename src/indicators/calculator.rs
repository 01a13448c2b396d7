//! Calculator for technical indicators: moving averages, RSI, MACD,
//! Bollinger Bands and volatility.
//!
//! Every indicator has a minimum window length. Below it the value is
//! reported as unavailable (`None`), never as zero and never as an error.

use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::Statistics;

use crate::models::{Indicators, PricePoint};

/// Default number of most recent points an indicator snapshot reads.
pub const INDICATOR_WINDOW: usize = 100;

const SMA_SHORT: usize = 20;
const SMA_LONG: usize = 50;
const EMA_FAST: usize = 12;
const EMA_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;
const VOLATILITY_PERIOD: usize = 20;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Calculator for indicator snapshots.
pub struct IndicatorCalculator;

impl IndicatorCalculator {
    /// Compute all indicators from a series ordered newest first, as the
    /// price store returns it.
    ///
    /// At most `window_limit` of the newest points are used; they are put
    /// back into chronological order before any calculation.
    pub fn compute(series: &[PricePoint], window_limit: usize) -> Indicators {
        let prices: Vec<f64> = series
            .iter()
            .take(window_limit)
            .rev()
            .filter_map(|p| p.price.to_f64())
            .collect();

        Self::from_prices(&prices)
    }

    /// Compute all indicators from chronological prices.
    pub fn from_prices(prices: &[f64]) -> Indicators {
        let (macd, macd_signal, macd_histogram) = Self::macd(prices);
        let (bollinger_upper, bollinger_middle, bollinger_lower) = Self::bollinger_bands(prices);

        Indicators {
            sma_20: Self::sma(prices, SMA_SHORT),
            sma_50: Self::sma(prices, SMA_LONG),
            ema_12: Self::ema(prices, EMA_FAST),
            ema_26: Self::ema(prices, EMA_SLOW),
            rsi_14: Self::rsi(prices, RSI_PERIOD),
            macd,
            macd_signal,
            macd_histogram,
            bollinger_upper,
            bollinger_middle,
            bollinger_lower,
            volatility: Self::volatility(prices, VOLATILITY_PERIOD),
            points_used: prices.len(),
        }
    }

    /// Arithmetic mean of the last `period` prices.
    pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
        if period == 0 || prices.len() < period {
            return None;
        }
        Some(prices[prices.len() - period..].iter().mean())
    }

    /// Latest exponential moving average with smoothing `2 / (period + 1)`.
    pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
        if period == 0 || prices.len() < period {
            return None;
        }
        Self::ema_series(prices, period).last().copied()
    }

    /// Full EMA path, seeded with the first value and no bias adjustment.
    fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
        let alpha = 2.0 / (period as f64 + 1.0);
        let mut out = Vec::with_capacity(values.len());

        let mut current = match values.first() {
            Some(&first) => first,
            None => return out,
        };
        out.push(current);

        for &value in &values[1..] {
            current = alpha * value + (1.0 - alpha) * current;
            out.push(current);
        }

        out
    }

    /// Relative Strength Index from simple means of the last `period` deltas.
    ///
    /// Needs `period + 1` prices. With no losses in the window the RSI is 100,
    /// including a completely flat window, so a price pinned at the simulator
    /// floor reads as overbought.
    pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
        if period == 0 || prices.len() < period + 1 {
            return None;
        }

        let n = prices.len();
        let (mut gains, mut losses) = (0.0, 0.0);
        for i in (n - period)..n {
            let change = prices[i] - prices[i - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }

    /// MACD(12, 26, 9) as (line, signal, histogram).
    pub fn macd(prices: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
        if prices.len() < EMA_SLOW {
            return (None, None, None);
        }

        let fast = Self::ema_series(prices, EMA_FAST);
        let slow = Self::ema_series(prices, EMA_SLOW);
        let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = Self::ema_series(&line, MACD_SIGNAL);

        match (line.last(), signal.last()) {
            (Some(&m), Some(&s)) => (Some(m), Some(s), Some(m - s)),
            _ => (None, None, None),
        }
    }

    /// Bollinger Bands(20, 2σ) as (upper, middle, lower).
    pub fn bollinger_bands(prices: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
        if prices.len() < BOLLINGER_PERIOD {
            return (None, None, None);
        }

        let window = &prices[prices.len() - BOLLINGER_PERIOD..];
        let middle = window.iter().mean();
        let std_dev = window.iter().std_dev();

        (
            Some(middle + BOLLINGER_WIDTH * std_dev),
            Some(middle),
            Some(middle - BOLLINGER_WIDTH * std_dev),
        )
    }

    /// Annualized standard deviation of the last `period` period-over-period
    /// returns. Needs `period + 1` prices.
    pub fn volatility(prices: &[f64], period: usize) -> Option<f64> {
        if period < 2 || prices.len() < period + 1 {
            return None;
        }

        let n = prices.len();
        let returns: Vec<f64> = ((n - period)..n)
            .map(|i| prices[i] / prices[i - 1] - 1.0)
            .collect();

        Some(returns.std_dev() * TRADING_DAYS_PER_YEAR.sqrt())
    }
}
