//! Execution engine: applies BUY/SELL orders to an account's ledger.
//!
//! Each order runs in one [`LedgerTx`](crate::db::LedgerTx). Every
//! validation failure returns before commit, and dropping the transaction
//! rolls back, so cash, position and trade record change together or not
//! at all.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::db::{Database, LedgerTx};
use crate::error::{EngineError, EngineResult};
use crate::models::{Instrument, Position, PricePoint, TradeRecord, TradeSide};

/// Executes market orders at the latest simulated price.
pub struct ExecutionEngine {
    db: Arc<Database>,
}

impl ExecutionEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Most recent price of an instrument. Read-only, outside any transaction.
    pub async fn latest_price(&self, instrument: &Instrument) -> EngineResult<PricePoint> {
        self.db
            .latest_price(instrument.id)
            .await?
            .ok_or_else(|| EngineError::NoPricingData(instrument.symbol.clone()))
    }

    /// Execute an order on either side.
    pub async fn execute(
        &self,
        account_id: i64,
        instrument: &Instrument,
        side: TradeSide,
        quantity: i64,
    ) -> EngineResult<TradeRecord> {
        match side {
            TradeSide::Buy => self.buy(account_id, instrument, quantity).await,
            TradeSide::Sell => self.sell(account_id, instrument, quantity).await,
        }
    }

    /// Buy `quantity` shares, debiting cash and averaging into the position.
    pub async fn buy(
        &self,
        account_id: i64,
        instrument: &Instrument,
        quantity: i64,
    ) -> EngineResult<TradeRecord> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let mut tx = self.db.begin().await?;
        let account = tx.lock_account(account_id).await?;
        let price = Self::execution_price(&mut tx, instrument).await?;

        let cost = price * Decimal::from(quantity);
        if account.cash_balance < cost {
            return Err(EngineError::InsufficientFunds {
                required: cost,
                available: account.cash_balance,
            });
        }
        let cash_after = account.cash_balance - cost;

        let position = match tx.position(account_id, instrument.id).await? {
            Some(mut existing) => {
                existing.add(quantity, price);
                existing
            }
            None => Position::open(account_id, instrument.id, quantity, price),
        };

        tx.set_cash(account_id, cash_after).await?;
        tx.save_position(&position).await?;
        let trade = Self::record(&mut tx, account_id, instrument, TradeSide::Buy, quantity, price, cash_after).await?;
        tx.commit().await?;

        info!(
            account = account_id,
            symbol = %instrument.symbol,
            quantity = quantity,
            price = %price,
            cash = %cash_after,
            "Bought"
        );

        Ok(trade)
    }

    /// Sell `quantity` shares, crediting cash. The position's average cost
    /// is kept; the row is removed once nothing is held.
    pub async fn sell(
        &self,
        account_id: i64,
        instrument: &Instrument,
        quantity: i64,
    ) -> EngineResult<TradeRecord> {
        if quantity <= 0 {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let mut tx = self.db.begin().await?;
        let account = tx.lock_account(account_id).await?;
        let price = Self::execution_price(&mut tx, instrument).await?;

        let mut position = tx
            .position(account_id, instrument.id)
            .await?
            .ok_or_else(|| EngineError::NoPosition(instrument.symbol.clone()))?;

        if quantity > position.quantity {
            return Err(EngineError::InsufficientShares {
                held: position.quantity,
                requested: quantity,
            });
        }

        let proceeds = price * Decimal::from(quantity);
        let cash_after = account.cash_balance + proceeds;

        position.reduce(quantity, price);
        if position.is_closed() {
            tx.delete_position(account_id, instrument.id).await?;
        } else {
            tx.save_position(&position).await?;
        }

        tx.set_cash(account_id, cash_after).await?;
        let trade = Self::record(&mut tx, account_id, instrument, TradeSide::Sell, quantity, price, cash_after).await?;
        tx.commit().await?;

        info!(
            account = account_id,
            symbol = %instrument.symbol,
            quantity = quantity,
            price = %price,
            cash = %cash_after,
            remaining = position.quantity,
            "Sold"
        );

        Ok(trade)
    }

    async fn execution_price(tx: &mut LedgerTx, instrument: &Instrument) -> EngineResult<Decimal> {
        tx.latest_price(instrument.id)
            .await?
            .map(|point| point.price)
            .ok_or_else(|| EngineError::NoPricingData(instrument.symbol.clone()))
    }

    async fn record(
        tx: &mut LedgerTx,
        account_id: i64,
        instrument: &Instrument,
        side: TradeSide,
        quantity: i64,
        price: Decimal,
        cash_after: Decimal,
    ) -> EngineResult<TradeRecord> {
        let mut trade = TradeRecord {
            id: 0,
            account_id,
            instrument_id: instrument.id,
            symbol: instrument.symbol.clone(),
            side,
            quantity,
            price,
            total_amount: price * Decimal::from(quantity),
            cash_after,
            timestamp: tx.now(),
        };

        trade.id = tx.insert_trade(&trade).await?;
        Ok(trade)
    }
}
