//! Technical indicator snapshot for one instrument.

use serde::{Deserialize, Serialize};

/// Indicator values computed from a recent price window.
///
/// `None` means the window was too short for that indicator. Consumers must
/// exclude unavailable values from decisions rather than read them as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,

    /// RSI(14), 0 to 100
    pub rsi_14: Option<f64>,

    // === MACD(12, 26, 9) ===
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,

    // === Bollinger Bands(20, 2) ===
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,

    /// Annualized volatility of period returns
    pub volatility: Option<f64>,

    /// Number of price points the snapshot was computed from
    pub points_used: usize,
}

impl Indicators {
    /// Named values in display order, for prompts and tables.
    pub fn entries(&self) -> [(&'static str, Option<f64>); 12] {
        [
            ("SMA(20)", self.sma_20),
            ("SMA(50)", self.sma_50),
            ("EMA(12)", self.ema_12),
            ("EMA(26)", self.ema_26),
            ("RSI(14)", self.rsi_14),
            ("MACD", self.macd),
            ("MACD Signal", self.macd_signal),
            ("MACD Histogram", self.macd_histogram),
            ("Bollinger Upper", self.bollinger_upper),
            ("Bollinger Middle", self.bollinger_middle),
            ("Bollinger Lower", self.bollinger_lower),
            ("Volatility", self.volatility),
        ]
    }
}
