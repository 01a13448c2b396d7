//! Transactional ledger access.
//!
//! All cash and position mutations for one trade go through a single
//! [`LedgerTx`]. The first statement of every execution write-locks the
//! account row, so a second execution against the same account waits for
//! the first to commit or roll back before it reads the balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::{StoredAccount, StoredPosition, StoredPricePoint};
use crate::error::{EngineError, EngineResult};
use crate::models::{Account, Position, PricePoint, TradeRecord};

pub(super) async fn latest_price(
    conn: &mut SqliteConnection,
    instrument_id: i64,
) -> EngineResult<Option<PricePoint>> {
    let row = sqlx::query_as::<_, StoredPricePoint>(
        r#"
        SELECT instrument_id, price, volume, timestamp
        FROM price_points
        WHERE instrument_id = ?
        ORDER BY timestamp DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(instrument_id)
    .fetch_optional(conn)
    .await?;

    row.map(PricePoint::try_from).transpose()
}

pub(super) async fn fetch_account(
    conn: &mut SqliteConnection,
    account_id: i64,
) -> EngineResult<Option<Account>> {
    let row = sqlx::query_as::<_, StoredAccount>(
        "SELECT id, owner, cash_balance, created_at, updated_at FROM accounts WHERE id = ?",
    )
    .bind(account_id)
    .fetch_optional(conn)
    .await?;

    row.map(Account::try_from).transpose()
}

pub(super) async fn fetch_position(
    conn: &mut SqliteConnection,
    account_id: i64,
    instrument_id: i64,
) -> EngineResult<Option<Position>> {
    let row = sqlx::query_as::<_, StoredPosition>(
        r#"
        SELECT p.account_id, p.instrument_id, i.symbol, p.quantity,
               p.avg_cost, p.last_price, p.updated_at
        FROM positions p
        JOIN instruments i ON i.id = p.instrument_id
        WHERE p.account_id = ? AND p.instrument_id = ?
        "#,
    )
    .bind(account_id)
    .bind(instrument_id)
    .fetch_optional(conn)
    .await?;

    row.map(Position::try_from).transpose()
}

/// An open ledger transaction. Dropping it without [`LedgerTx::commit`]
/// rolls every mutation back.
pub struct LedgerTx {
    tx: Transaction<'static, Sqlite>,
    now: DateTime<Utc>,
}

impl LedgerTx {
    pub(super) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx, now: Utc::now() }
    }

    /// Timestamp shared by every row this transaction writes.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Take the account's write lock and return its current state.
    pub async fn lock_account(&mut self, account_id: i64) -> EngineResult<Account> {
        let result = sqlx::query("UPDATE accounts SET updated_at = ? WHERE id = ?")
            .bind(self.now)
            .bind(account_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::AccountNotFound(account_id));
        }

        fetch_account(&mut self.tx, account_id)
            .await?
            .ok_or(EngineError::AccountNotFound(account_id))
    }

    pub async fn latest_price(&mut self, instrument_id: i64) -> EngineResult<Option<PricePoint>> {
        latest_price(&mut self.tx, instrument_id).await
    }

    pub async fn position(
        &mut self,
        account_id: i64,
        instrument_id: i64,
    ) -> EngineResult<Option<Position>> {
        fetch_position(&mut self.tx, account_id, instrument_id).await
    }

    pub async fn set_cash(&mut self, account_id: i64, cash_balance: Decimal) -> EngineResult<()> {
        sqlx::query("UPDATE accounts SET cash_balance = ?, updated_at = ? WHERE id = ?")
            .bind(cash_balance.to_string())
            .bind(self.now)
            .bind(account_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    /// Insert or overwrite a position row.
    pub async fn save_position(&mut self, position: &Position) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO positions
                (account_id, instrument_id, quantity, avg_cost, last_price, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, instrument_id) DO UPDATE SET
                quantity = excluded.quantity,
                avg_cost = excluded.avg_cost,
                last_price = excluded.last_price,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(position.account_id)
        .bind(position.instrument_id)
        .bind(position.quantity)
        .bind(position.avg_cost.to_string())
        .bind(position.last_price.to_string())
        .bind(self.now)
        .bind(self.now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    pub async fn delete_position(&mut self, account_id: i64, instrument_id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM positions WHERE account_id = ? AND instrument_id = ?")
            .bind(account_id)
            .bind(instrument_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    /// Append to the trade log and return the new record id.
    pub async fn insert_trade(&mut self, trade: &TradeRecord) -> EngineResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO trades
                (account_id, instrument_id, side, quantity, price, total_amount, cash_after, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(trade.account_id)
        .bind(trade.instrument_id)
        .bind(trade.side.as_str())
        .bind(trade.quantity)
        .bind(trade.price.to_string())
        .bind(trade.total_amount.to_string())
        .bind(trade.cash_after.to_string())
        .bind(trade.timestamp)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    pub async fn commit(self) -> EngineResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
