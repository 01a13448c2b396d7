//! Trade model representing an executed paper trade.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side: {other}")),
        }
    }
}

/// Immutable ledger entry written alongside every cash/position mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,

    pub account_id: i64,

    pub instrument_id: i64,

    /// Instrument symbol for display
    #[serde(default)]
    pub symbol: String,

    pub side: TradeSide,

    /// Number of shares, always positive
    pub quantity: i64,

    /// Price per share at execution
    pub price: Decimal,

    /// `price * quantity`
    pub total_amount: Decimal,

    /// Account cash balance after this trade was applied
    pub cash_after: Decimal,

    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    /// Signed effect of this trade on the account's cash balance.
    pub fn cash_delta(&self) -> Decimal {
        match self.side {
            TradeSide::Buy => -self.total_amount,
            TradeSide::Sell => self.total_amount,
        }
    }

    /// Signed effect of this trade on the held quantity.
    pub fn quantity_delta(&self) -> i64 {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }
}
