//! Caller-facing operations over the trading engine.
//!
//! Every failure a caller can cause is returned as a named [`EngineError`]
//! variant.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorCalculator;
use crate::models::{
    Account, AutoTradeConfig, AutoTradeConfigUpdate, Indicators, Instrument, Position, PricePoint,
    Signal, TradeRecord, TradeSide,
};
use crate::trading::{ExecutionEngine, SignalEngine, TradingConfig};

/// An instrument with its most recent price, if any.
#[derive(Debug, Clone, Serialize)]
pub struct TickerQuote {
    pub instrument: Instrument,
    pub last: Option<PricePoint>,
}

/// An account's holdings valued at the latest observed prices.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioView {
    pub account_id: i64,
    pub cash_balance: Decimal,
    pub positions: Vec<Position>,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PortfolioView {
    fn new(account: &Account, positions: Vec<Position>) -> Self {
        let market_value: Decimal = positions.iter().map(Position::market_value).sum();
        let cost_basis: Decimal = positions.iter().map(Position::cost_basis).sum();

        Self {
            account_id: account.id,
            cash_balance: account.cash_balance,
            positions,
            market_value,
            cost_basis,
            unrealized_pnl: market_value - cost_basis,
        }
    }

    /// Cash plus holdings at market.
    pub fn total_value(&self) -> Decimal {
        self.cash_balance + self.market_value
    }
}

/// Entry point for user-initiated requests.
pub struct TradingService {
    db: Arc<Database>,
    signals: Arc<SignalEngine>,
    execution: Arc<ExecutionEngine>,
    config: TradingConfig,
}

impl TradingService {
    pub fn new(db: Arc<Database>, signals: Arc<SignalEngine>, config: TradingConfig) -> Self {
        let execution = Arc::new(ExecutionEngine::new(db.clone()));
        Self {
            db,
            signals,
            execution,
            config,
        }
    }

    pub fn execution(&self) -> Arc<ExecutionEngine> {
        self.execution.clone()
    }

    async fn instrument(&self, symbol: &str) -> EngineResult<Instrument> {
        let symbol = symbol.trim().to_uppercase();
        self.db
            .find_instrument(&symbol)
            .await?
            .ok_or(EngineError::InstrumentNotFound(symbol))
    }

    /// All instruments with their latest prices.
    pub async fn get_tickers(&self) -> EngineResult<Vec<TickerQuote>> {
        let instruments = self.db.list_instruments().await?;

        let mut quotes = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let last = self.db.latest_price(instrument.id).await?;
            quotes.push(TickerQuote { instrument, last });
        }

        Ok(quotes)
    }

    /// Up to `limit` most recent prices, newest first.
    pub async fn get_price_history(&self, symbol: &str, limit: usize) -> EngineResult<Vec<PricePoint>> {
        let instrument = self.instrument(symbol).await?;
        self.db.read_recent_prices(instrument.id, limit).await
    }

    pub async fn get_indicators(&self, symbol: &str) -> EngineResult<Indicators> {
        let instrument = self.instrument(symbol).await?;
        self.indicators_for(&instrument).await
    }

    async fn indicators_for(&self, instrument: &Instrument) -> EngineResult<Indicators> {
        let window = self.config.indicator_window;
        let series = self.db.read_recent_prices(instrument.id, window).await?;
        Ok(IndicatorCalculator::compute(&series, window))
    }

    pub async fn get_signal(&self, symbol: &str) -> EngineResult<Signal> {
        let instrument = self.instrument(symbol).await?;
        let indicators = self.indicators_for(&instrument).await?;
        Ok(self.signals.decide(&indicators, &instrument.symbol).await)
    }

    pub async fn execute_trade(
        &self,
        account_id: i64,
        symbol: &str,
        side: TradeSide,
        quantity: i64,
    ) -> EngineResult<TradeRecord> {
        let instrument = self.instrument(symbol).await?;
        self.execution.execute(account_id, &instrument, side, quantity).await
    }

    /// Holdings with last prices refreshed from the latest ticks.
    ///
    /// A position whose instrument has no price keeps its previous
    /// observation.
    pub async fn get_portfolio(&self, account_id: i64) -> EngineResult<PortfolioView> {
        let account = self
            .db
            .get_account(account_id)
            .await?
            .ok_or(EngineError::AccountNotFound(account_id))?;

        let mut positions = self.db.list_positions(account_id).await?;
        for position in &mut positions {
            if let Some(latest) = self.db.latest_price(position.instrument_id).await? {
                if latest.price != position.last_price {
                    self.db
                        .update_position_price(account_id, position.instrument_id, latest.price)
                        .await?;
                    position.last_price = latest.price;
                }
            }
        }

        Ok(PortfolioView::new(&account, positions))
    }

    /// Trades of an account, newest first.
    pub async fn get_trade_history(&self, account_id: i64) -> EngineResult<Vec<TradeRecord>> {
        if self.db.get_account(account_id).await?.is_none() {
            return Err(EngineError::AccountNotFound(account_id));
        }
        self.db.list_trades(account_id).await
    }

    pub async fn get_auto_config(&self, account_id: i64) -> EngineResult<AutoTradeConfig> {
        self.db
            .get_auto_config(account_id)
            .await?
            .ok_or(EngineError::ConfigNotFound(account_id))
    }

    /// Apply the provided fields only. Invalid values leave the stored
    /// settings unchanged.
    pub async fn update_auto_config(
        &self,
        account_id: i64,
        update: &AutoTradeConfigUpdate,
    ) -> EngineResult<AutoTradeConfig> {
        let mut config = self.get_auto_config(account_id).await?;
        config.apply(update)?;
        self.db.save_auto_config(&config).await?;

        info!(
            account = account_id,
            enabled = config.enabled,
            threshold = config.confidence_threshold,
            max_order_size = config.max_order_size,
            "Auto-trading settings updated"
        );
        Ok(config)
    }

    /// Open an account with the default auto-trading settings.
    pub async fn open_account(&self, owner: &str, starting_cash: Option<Decimal>) -> EngineResult<Account> {
        let cash = starting_cash.unwrap_or(self.config.starting_cash);
        if cash < Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "starting cash must not be negative, got {cash}"
            )));
        }

        let defaults = &self.config.auto_trade;
        let account = self
            .db
            .create_account(
                owner,
                cash,
                defaults.enabled,
                defaults.confidence_threshold,
                defaults.max_order_size,
            )
            .await?;

        debug!(account = account.id, owner = %owner, cash = %cash, "Opened account");
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    async fn service() -> (Arc<Database>, TradingService) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let svc = TradingService::new(
            db.clone(),
            Arc::new(SignalEngine::rule_based_only()),
            TradingConfig::default(),
        );
        (db, svc)
    }

    async fn price(db: &Database, instrument: &Instrument, value: Decimal, offset_secs: i64) {
        let point = PricePoint::new(instrument.id, Utc::now() + Duration::seconds(offset_secs), value, 500);
        db.append_price_points(&[point]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_named() {
        let (_db, svc) = service().await;

        let result = svc.get_indicators("ZZZ").await;
        assert!(matches!(result, Err(EngineError::InstrumentNotFound(ref s)) if s == "ZZZ"));
        assert!(matches!(svc.get_signal("zzz").await, Err(EngineError::InstrumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_open_account_uses_defaults() {
        let (_db, svc) = service().await;

        let account = svc.open_account("carol", None).await.unwrap();
        assert_eq!(account.cash_balance, dec!(10000.00));

        let config = svc.get_auto_config(account.id).await.unwrap();
        assert!(!config.enabled);
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.max_order_size, 5);

        assert!(matches!(
            svc.open_account("dave", Some(dec!(-1))).await,
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_update_auto_config_is_partial_and_validated() {
        let (_db, svc) = service().await;
        let account = svc.open_account("erin", None).await.unwrap();

        let updated = svc
            .update_auto_config(
                account.id,
                &AutoTradeConfigUpdate {
                    enabled: Some(true),
                    ..AutoTradeConfigUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.enabled);
        assert_eq!(updated.max_order_size, 5);

        let rejected = svc
            .update_auto_config(
                account.id,
                &AutoTradeConfigUpdate {
                    confidence_threshold: Some(1.2),
                    ..AutoTradeConfigUpdate::default()
                },
            )
            .await;
        assert!(matches!(rejected, Err(EngineError::InvalidConfig(_))));
        assert_eq!(svc.get_auto_config(account.id).await.unwrap().confidence_threshold, 0.7);

        assert!(matches!(
            svc.get_auto_config(404).await,
            Err(EngineError::ConfigNotFound(404))
        ));
    }

    #[tokio::test]
    async fn test_portfolio_refreshes_prices() {
        let (db, svc) = service().await;
        let instrument = db.upsert_instrument("AMD", "Advanced Micro Devices Inc.").await.unwrap();
        price(&db, &instrument, dec!(120), 0).await;
        let account = svc.open_account("frank", Some(dec!(1000))).await.unwrap();

        svc.execute_trade(account.id, "amd", TradeSide::Buy, 5).await.unwrap();
        price(&db, &instrument, dec!(130), 10).await;

        let portfolio = svc.get_portfolio(account.id).await.unwrap();
        assert_eq!(portfolio.cash_balance, dec!(400));
        assert_eq!(portfolio.positions.len(), 1);
        assert_eq!(portfolio.positions[0].last_price, dec!(130));
        assert_eq!(portfolio.market_value, dec!(650));
        assert_eq!(portfolio.cost_basis, dec!(600));
        assert_eq!(portfolio.unrealized_pnl, dec!(50));
        assert_eq!(portfolio.total_value(), dec!(1050));

        // The refreshed price was persisted
        let stored = db.get_position(account.id, instrument.id).await.unwrap().unwrap();
        assert_eq!(stored.last_price, dec!(130));
    }

    #[tokio::test]
    async fn test_history_and_tickers() {
        let (db, svc) = service().await;
        let instrument = db.upsert_instrument("INTC", "Intel Corporation").await.unwrap();
        db.upsert_instrument("AMZN", "Amazon.com Inc.").await.unwrap();
        price(&db, &instrument, dec!(45), 0).await;
        price(&db, &instrument, dec!(46), 10).await;
        let account = svc.open_account("gina", Some(dec!(500))).await.unwrap();

        svc.execute_trade(account.id, "INTC", TradeSide::Buy, 2).await.unwrap();
        svc.execute_trade(account.id, "INTC", TradeSide::Sell, 1).await.unwrap();

        let trades = svc.get_trade_history(account.id).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, TradeSide::Sell);
        assert_eq!(trades[0].symbol, "INTC");

        let history = svc.get_price_history("INTC", 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, dec!(46));

        let tickers = svc.get_tickers().await.unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].instrument.symbol, "AMZN");
        assert!(tickers[0].last.is_none());
        assert_eq!(tickers[1].last.as_ref().unwrap().price, dec!(46));

        assert!(matches!(
            svc.get_trade_history(99).await,
            Err(EngineError::AccountNotFound(99))
        ));
    }
}
