//! Order sizing for the auto-trader.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Calculator for auto-trade order sizes, capped by the account's
/// `max_order_size`.
pub struct PositionSizer {
    max_order_size: i64,
}

impl PositionSizer {
    pub fn new(max_order_size: i64) -> Self {
        Self {
            max_order_size: max_order_size.max(0),
        }
    }

    /// Whole shares affordable with `cash` at `price`, capped.
    ///
    /// Returns 0 when not even one share is affordable.
    pub fn buy_size(&self, cash: Decimal, price: Decimal) -> i64 {
        if price <= Decimal::ZERO || cash <= Decimal::ZERO {
            return 0;
        }

        let affordable = (cash / price).floor().to_i64().unwrap_or(i64::MAX);
        affordable.min(self.max_order_size)
    }

    /// Shares to sell out of a holding of `held`, capped.
    pub fn sell_size(&self, held: i64) -> i64 {
        held.max(0).min(self.max_order_size)
    }
}
