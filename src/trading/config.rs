//! Trading configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_MODEL;
use crate::indicators::INDICATOR_WINDOW;

/// Settings a newly opened account starts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTradeDefaults {
    /// Whether auto-trading is on for new accounts
    pub enabled: bool,

    /// Minimum signal confidence to act on (0.0 to 1.0)
    pub confidence_threshold: f64,

    /// Largest order the auto-trader may place, in shares
    pub max_order_size: i64,
}

impl Default for AutoTradeDefaults {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: 0.7,
            max_order_size: 5,
        }
    }
}

/// Configuration for accounts, signals and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Cash credited to a new account
    pub starting_cash: Decimal,

    pub auto_trade: AutoTradeDefaults,

    /// Most recent points read for an indicator snapshot
    pub indicator_window: usize,

    /// Model name sent to the advisory source
    pub advisory_model: String,

    /// Upper bound on one advisory request, in seconds
    pub advisory_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            starting_cash: dec!(10000.00),
            auto_trade: AutoTradeDefaults::default(),
            indicator_window: INDICATOR_WINDOW,
            advisory_model: DEFAULT_MODEL.to_string(),
            advisory_timeout_secs: 30,
        }
    }
}
