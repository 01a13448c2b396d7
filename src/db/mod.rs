//! Database persistence for the paper-trading venue.
//!
//! Stores everything the engine reads and writes:
//! - Instruments and their append-only price series
//! - Accounts with cash balances
//! - Positions (one row per held account/instrument pair)
//! - The immutable trade log
//! - Per-account auto-trading settings
//!
//! Monetary values are stored as decimal text so that balances survive a
//! round trip exactly.

mod ledger;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Account, AutoTradeConfig, Instrument, Position, PricePoint, TradeRecord, TradeSide,
};

pub use ledger::LedgerTx;

/// How long a writer waits for a competing transaction before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Database connection pool with full state management.
pub struct Database {
    pool: SqlitePool,
}

/// Stored instrument record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredInstrument {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Stored price tick.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPricePoint {
    pub instrument_id: i64,
    pub price: String,
    pub volume: i64,
    pub timestamp: DateTime<Utc>,
}

/// Stored account record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAccount {
    pub id: i64,
    pub owner: String,
    pub cash_balance: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored position record, joined with its instrument symbol.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub account_id: i64,
    pub instrument_id: i64,
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: String,
    pub last_price: String,
    pub updated_at: DateTime<Utc>,
}

/// Stored trade record, joined with its instrument symbol.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub id: i64,
    pub account_id: i64,
    pub instrument_id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price: String,
    pub total_amount: String,
    pub cash_after: String,
    pub timestamp: DateTime<Utc>,
}

/// Stored auto-trading configuration.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAutoTradeConfig {
    pub account_id: i64,
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub max_order_size: i64,
    pub updated_at: DateTime<Utc>,
}

fn parse_decimal(field: &str, value: &str) -> EngineResult<Decimal> {
    Decimal::from_str(value)
        .map_err(|_| EngineError::CorruptValue(format!("{field} = {value:?}")))
}

impl From<StoredInstrument> for Instrument {
    fn from(row: StoredInstrument) -> Self {
        Instrument {
            id: row.id,
            symbol: row.symbol,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<StoredPricePoint> for PricePoint {
    type Error = EngineError;

    fn try_from(row: StoredPricePoint) -> EngineResult<Self> {
        Ok(PricePoint {
            instrument_id: row.instrument_id,
            timestamp: row.timestamp,
            price: parse_decimal("price", &row.price)?,
            volume: row.volume,
        })
    }
}

impl TryFrom<StoredAccount> for Account {
    type Error = EngineError;

    fn try_from(row: StoredAccount) -> EngineResult<Self> {
        Ok(Account {
            id: row.id,
            owner: row.owner,
            cash_balance: parse_decimal("cash_balance", &row.cash_balance)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<StoredPosition> for Position {
    type Error = EngineError;

    fn try_from(row: StoredPosition) -> EngineResult<Self> {
        Ok(Position {
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            quantity: row.quantity,
            avg_cost: parse_decimal("avg_cost", &row.avg_cost)?,
            last_price: parse_decimal("last_price", &row.last_price)?,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<StoredTrade> for TradeRecord {
    type Error = EngineError;

    fn try_from(row: StoredTrade) -> EngineResult<Self> {
        let side = TradeSide::from_str(&row.side).map_err(EngineError::CorruptValue)?;
        Ok(TradeRecord {
            id: row.id,
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            symbol: row.symbol,
            side,
            quantity: row.quantity,
            price: parse_decimal("price", &row.price)?,
            total_amount: parse_decimal("total_amount", &row.total_amount)?,
            cash_after: parse_decimal("cash_after", &row.cash_after)?,
            timestamp: row.timestamp,
        })
    }
}

impl From<StoredAutoTradeConfig> for AutoTradeConfig {
    fn from(row: StoredAutoTradeConfig) -> Self {
        AutoTradeConfig {
            account_id: row.account_id,
            enabled: row.enabled,
            confidence_threshold: row.confidence_threshold,
            max_order_size: row.max_order_size,
            updated_at: row.updated_at,
        }
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Create a private in-memory database.
    ///
    /// Uses a single connection that is never recycled, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_id INTEGER NOT NULL,
                price TEXT NOT NULL,
                volume INTEGER NOT NULL DEFAULT 0,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (instrument_id) REFERENCES instruments(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner TEXT NOT NULL,
                cash_balance TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                instrument_id INTEGER NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                avg_cost TEXT NOT NULL,
                last_price TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(account_id, instrument_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id),
                FOREIGN KEY (instrument_id) REFERENCES instruments(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                instrument_id INTEGER NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                price TEXT NOT NULL,
                total_amount TEXT NOT NULL,
                cash_after TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id),
                FOREIGN KEY (instrument_id) REFERENCES instruments(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auto_trade_configs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL UNIQUE,
                enabled INTEGER NOT NULL DEFAULT 0,
                confidence_threshold REAL NOT NULL,
                max_order_size INTEGER NOT NULL CHECK (max_order_size > 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_price_points_series ON price_points(instrument_id, timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_account ON positions(account_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account_id, timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_auto_trade_enabled ON auto_trade_configs(enabled)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a ledger transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> EngineResult<LedgerTx> {
        Ok(LedgerTx::new(self.pool.begin().await?))
    }

    // ==================== Instruments ====================

    /// Create an instrument, or refresh the display name of an existing one.
    pub async fn upsert_instrument(&self, symbol: &str, name: &str) -> EngineResult<Instrument> {
        let row = sqlx::query_as::<_, StoredInstrument>(
            r#"
            INSERT INTO instruments (symbol, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET name = excluded.name
            RETURNING id, symbol, name, created_at
            "#,
        )
        .bind(symbol)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Get all instruments ordered by symbol.
    pub async fn list_instruments(&self) -> EngineResult<Vec<Instrument>> {
        let rows = sqlx::query_as::<_, StoredInstrument>(
            "SELECT id, symbol, name, created_at FROM instruments ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Instrument::from).collect())
    }

    /// Look up an instrument by symbol.
    pub async fn find_instrument(&self, symbol: &str) -> EngineResult<Option<Instrument>> {
        let row = sqlx::query_as::<_, StoredInstrument>(
            "SELECT id, symbol, name, created_at FROM instruments WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Instrument::from))
    }

    // ==================== Price Series ====================

    /// Most recent price point for an instrument.
    pub async fn latest_price(&self, instrument_id: i64) -> EngineResult<Option<PricePoint>> {
        let mut conn = self.pool.acquire().await?;
        ledger::latest_price(&mut conn, instrument_id).await
    }

    /// Number of stored points for an instrument.
    pub async fn count_price_points(&self, instrument_id: i64) -> EngineResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM price_points WHERE instrument_id = ?")
                .bind(instrument_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Append a batch of price points in one transaction.
    pub async fn append_price_points(&self, batch: &[PricePoint]) -> EngineResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx: Transaction<'_, Sqlite> = self.pool.begin().await?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO price_points (instrument_id, price, volume, timestamp) ");
        builder.push_values(batch, |mut row, point| {
            row.push_bind(point.instrument_id)
                .push_bind(point.price.to_string())
                .push_bind(point.volume)
                .push_bind(point.timestamp);
        });
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Read up to `limit` most recent points, newest first.
    pub async fn read_recent_prices(
        &self,
        instrument_id: i64,
        limit: usize,
    ) -> EngineResult<Vec<PricePoint>> {
        // A negative LIMIT means no limit to SQLite
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, StoredPricePoint>(
            r#"
            SELECT instrument_id, price, volume, timestamp
            FROM price_points
            WHERE instrument_id = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(instrument_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PricePoint::try_from).collect()
    }

    // ==================== Accounts ====================

    /// Create an account together with its auto-trading settings.
    pub async fn create_account(
        &self,
        owner: &str,
        starting_cash: Decimal,
        auto_enabled: bool,
        confidence_threshold: f64,
        max_order_size: i64,
    ) -> EngineResult<Account> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StoredAccount>(
            r#"
            INSERT INTO accounts (owner, cash_balance, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, owner, cash_balance, created_at, updated_at
            "#,
        )
        .bind(owner)
        .bind(starting_cash.to_string())
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO auto_trade_configs
                (account_id, enabled, confidence_threshold, max_order_size, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.id)
        .bind(auto_enabled)
        .bind(confidence_threshold)
        .bind(max_order_size)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Account::try_from(row)
    }

    /// Get an account by id.
    pub async fn get_account(&self, account_id: i64) -> EngineResult<Option<Account>> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_account(&mut conn, account_id).await
    }

    // ==================== Auto-Trading Config ====================

    /// Get the auto-trading settings of an account.
    pub async fn get_auto_config(&self, account_id: i64) -> EngineResult<Option<AutoTradeConfig>> {
        let row = sqlx::query_as::<_, StoredAutoTradeConfig>(
            r#"
            SELECT account_id, enabled, confidence_threshold, max_order_size, updated_at
            FROM auto_trade_configs WHERE account_id = ?
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AutoTradeConfig::from))
    }

    /// Persist updated auto-trading settings.
    pub async fn save_auto_config(&self, config: &AutoTradeConfig) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE auto_trade_configs SET
                enabled = ?,
                confidence_threshold = ?,
                max_order_size = ?,
                updated_at = ?
            WHERE account_id = ?
            "#,
        )
        .bind(config.enabled)
        .bind(config.confidence_threshold)
        .bind(config.max_order_size)
        .bind(config.updated_at)
        .bind(config.account_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConfigNotFound(config.account_id));
        }
        Ok(())
    }

    /// All settings with auto-trading switched on.
    pub async fn enabled_auto_configs(&self) -> EngineResult<Vec<AutoTradeConfig>> {
        let rows = sqlx::query_as::<_, StoredAutoTradeConfig>(
            r#"
            SELECT account_id, enabled, confidence_threshold, max_order_size, updated_at
            FROM auto_trade_configs WHERE enabled = 1 ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AutoTradeConfig::from).collect())
    }

    // ==================== Positions ====================

    /// Get the holding of an account in one instrument.
    pub async fn get_position(
        &self,
        account_id: i64,
        instrument_id: i64,
    ) -> EngineResult<Option<Position>> {
        let mut conn = self.pool.acquire().await?;
        ledger::fetch_position(&mut conn, account_id, instrument_id).await
    }

    /// Get all holdings of an account ordered by symbol.
    pub async fn list_positions(&self, account_id: i64) -> EngineResult<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT p.account_id, p.instrument_id, i.symbol, p.quantity,
                   p.avg_cost, p.last_price, p.updated_at
            FROM positions p
            JOIN instruments i ON i.id = p.instrument_id
            WHERE p.account_id = ?
            ORDER BY i.symbol
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Position::try_from).collect()
    }

    /// Record a newer market observation on a position.
    pub async fn update_position_price(
        &self,
        account_id: i64,
        instrument_id: i64,
        last_price: Decimal,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE positions SET last_price = ?, updated_at = ?
            WHERE account_id = ? AND instrument_id = ?
            "#,
        )
        .bind(last_price.to_string())
        .bind(Utc::now())
        .bind(account_id)
        .bind(instrument_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Trades ====================

    /// Trade history of an account, newest first.
    pub async fn list_trades(&self, account_id: i64) -> EngineResult<Vec<TradeRecord>> {
        let rows = sqlx::query_as::<_, StoredTrade>(
            r#"
            SELECT t.id, t.account_id, t.instrument_id, i.symbol, t.side, t.quantity,
                   t.price, t.total_amount, t.cash_after, t.timestamp
            FROM trades t
            JOIN instruments i ON i.id = t.instrument_id
            WHERE t.account_id = ?
            ORDER BY t.timestamp DESC, t.id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TradeRecord::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_upsert_instrument_is_idempotent() {
        let db = Database::in_memory().await.unwrap();

        let first = db.upsert_instrument("AAPL", "Apple").await.unwrap();
        let second = db.upsert_instrument("AAPL", "Apple Inc.").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Apple Inc.");
        assert_eq!(db.list_instruments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recent_prices_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let instrument = db.upsert_instrument("AAPL", "Apple Inc.").await.unwrap();

        let start = Utc::now() - ChronoDuration::minutes(10);
        let batch: Vec<_> = (0..5)
            .map(|i| {
                PricePoint::new(
                    instrument.id,
                    start + ChronoDuration::minutes(i),
                    Decimal::from(100 + i),
                    1_000,
                )
            })
            .collect();
        db.append_price_points(&batch).await.unwrap();

        let recent = db.read_recent_prices(instrument.id, 3).await.unwrap();
        let prices: Vec<_> = recent.iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![dec!(104), dec!(103), dec!(102)]);

        assert!(db.read_recent_prices(instrument.id, 0).await.unwrap().is_empty());
        let all = db.read_recent_prices(instrument.id, usize::MAX).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].price, dec!(104));

        let latest = db.latest_price(instrument.id).await.unwrap().unwrap();
        assert_eq!(latest.price, dec!(104));
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_account_round_trips_exact_cash() {
        let db = Database::in_memory().await.unwrap();
        let account = db
            .create_account("alice", dec!(10000.01), false, 0.7, 5)
            .await
            .unwrap();

        let loaded = db.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.cash_balance, dec!(10000.01));

        let config = db.get_auto_config(account.id).await.unwrap().unwrap();
        assert!(!config.enabled);
        assert_eq!(config.max_order_size, 5);
        assert!(db.enabled_auto_configs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_auto_config_unknown_account() {
        let db = Database::in_memory().await.unwrap();
        let config = AutoTradeConfig {
            account_id: 42,
            enabled: true,
            confidence_threshold: 0.5,
            max_order_size: 1,
            updated_at: Utc::now(),
        };

        let result = db.save_auto_config(&config).await;
        assert!(matches!(result, Err(EngineError::ConfigNotFound(42))));
    }
}
