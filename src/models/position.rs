//! Position model representing an account's holding in one instrument.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current holding of an account in an instrument.
///
/// A position with zero quantity does not exist; the ledger deletes the row
/// when the last share is sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub account_id: i64,

    pub instrument_id: i64,

    /// Instrument symbol for display
    #[serde(default)]
    pub symbol: String,

    /// Number of shares held
    pub quantity: i64,

    /// Quantity-weighted average purchase price
    pub avg_cost: Decimal,

    /// Most recently observed market price
    pub last_price: Decimal,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a new position from an initial buy.
    pub fn open(account_id: i64, instrument_id: i64, quantity: i64, price: Decimal) -> Self {
        Self {
            account_id,
            instrument_id,
            symbol: String::new(),
            quantity,
            avg_cost: price,
            last_price: price,
            updated_at: Utc::now(),
        }
    }

    /// Add to position (averaging in).
    pub fn add(&mut self, quantity: i64, price: Decimal) {
        let new_quantity = self.quantity + quantity;
        let total_cost = self.avg_cost * Decimal::from(self.quantity) + price * Decimal::from(quantity);

        if new_quantity > 0 {
            self.avg_cost = total_cost / Decimal::from(new_quantity);
        }

        self.quantity = new_quantity;
        self.last_price = price;
        self.updated_at = Utc::now();
    }

    /// Reduce position size. The cost basis is left untouched.
    pub fn reduce(&mut self, quantity: i64, price: Decimal) {
        self.quantity -= quantity.min(self.quantity);
        self.last_price = price;
        self.updated_at = Utc::now();
    }

    /// Check if this position is closed.
    pub fn is_closed(&self) -> bool {
        self.quantity == 0
    }

    /// Value of the holding at the last observed price.
    pub fn market_value(&self) -> Decimal {
        self.last_price * Decimal::from(self.quantity)
    }

    /// What was paid for the shares still held.
    pub fn cost_basis(&self) -> Decimal {
        self.avg_cost * Decimal::from(self.quantity)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.market_value() - self.cost_basis()
    }
}
