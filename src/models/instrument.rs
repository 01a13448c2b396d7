//! Tradable instruments and their price observations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable symbol with a price series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,

    /// Ticker symbol, unique and immutable once created
    pub symbol: String,

    /// Display name
    pub name: String,

    pub created_at: DateTime<Utc>,
}

/// One observation in an instrument's price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub instrument_id: i64,

    pub timestamp: DateTime<Utc>,

    /// Always strictly positive
    pub price: Decimal,

    pub volume: i64,
}

impl PricePoint {
    pub fn new(instrument_id: i64, timestamp: DateTime<Utc>, price: Decimal, volume: i64) -> Self {
        Self {
            instrument_id,
            timestamp,
            price,
            volume,
        }
    }
}
