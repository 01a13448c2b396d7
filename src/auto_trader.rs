//! Auto-trading cycle.
//!
//! One cycle evaluates every instrument for every account that has
//! auto-trading enabled: signal, confidence filter, sizing, execution.
//! Each (account, instrument) pair ends in exactly one [`PairOutcome`];
//! a failure on one pair never stops the rest of the cycle.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorCalculator;
use crate::models::{AutoTradeConfig, Instrument, Signal, TradeRecord, TradeSide};
use crate::trading::{ExecutionEngine, PositionSizer, SignalEngine};

/// How one (account, instrument) candidate ended.
#[derive(Debug)]
pub enum PairOutcome {
    Executed(TradeRecord),
    Skipped(String),
    Failed(String),
}

#[derive(Debug)]
pub struct PairReport {
    pub account_id: i64,
    pub symbol: String,
    pub signal: Option<Signal>,
    pub outcome: PairOutcome,
}

/// Everything a cycle did, pair by pair.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub accounts: usize,
    pub pairs: Vec<PairReport>,
}

impl CycleReport {
    pub fn executed(&self) -> impl Iterator<Item = &TradeRecord> {
        self.pairs.iter().filter_map(|p| match &p.outcome {
            PairOutcome::Executed(trade) => Some(trade),
            _ => None,
        })
    }

    pub fn skipped_count(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Skipped(_)))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Failed(_)))
            .count()
    }
}

/// Runs auto-trading cycles.
pub struct AutoTrader {
    db: Arc<Database>,
    signals: Arc<SignalEngine>,
    execution: Arc<ExecutionEngine>,
    indicator_window: usize,
}

impl AutoTrader {
    pub fn new(
        db: Arc<Database>,
        signals: Arc<SignalEngine>,
        execution: Arc<ExecutionEngine>,
        indicator_window: usize,
    ) -> Self {
        Self {
            db,
            signals,
            execution,
            indicator_window,
        }
    }

    /// Run one full cycle over the enabled accounts.
    ///
    /// Only failing to list accounts or instruments aborts the cycle.
    pub async fn run_cycle(&self) -> EngineResult<CycleReport> {
        let configs = self.db.enabled_auto_configs().await?;
        if configs.is_empty() {
            debug!("No accounts with auto-trading enabled");
            return Ok(CycleReport::default());
        }

        let instruments = self.db.list_instruments().await?;
        let mut report = CycleReport {
            accounts: configs.len(),
            pairs: Vec::with_capacity(configs.len() * instruments.len()),
        };

        // Signals depend only on the instrument, so each is decided once per cycle
        let mut signals: HashMap<i64, Result<Signal, String>> = HashMap::new();

        for config in &configs {
            for instrument in &instruments {
                if !signals.contains_key(&instrument.id) {
                    let decided = self.signal_for(instrument).await.map_err(|e| e.to_string());
                    signals.insert(instrument.id, decided);
                }

                let pair = match signals.get(&instrument.id) {
                    Some(Ok(signal)) => {
                        let outcome = match self.act(config, instrument, signal).await {
                            Ok(outcome) => outcome,
                            Err(e) => PairOutcome::Failed(e.to_string()),
                        };
                        PairReport {
                            account_id: config.account_id,
                            symbol: instrument.symbol.clone(),
                            signal: Some(signal.clone()),
                            outcome,
                        }
                    }
                    Some(Err(e)) => PairReport {
                        account_id: config.account_id,
                        symbol: instrument.symbol.clone(),
                        signal: None,
                        outcome: PairOutcome::Failed(e.clone()),
                    },
                    None => continue,
                };

                Self::log_pair(&pair);
                report.pairs.push(pair);
            }
        }

        info!(
            accounts = report.accounts,
            executed = report.executed().count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            "Auto-trading cycle complete"
        );

        Ok(report)
    }

    async fn signal_for(&self, instrument: &Instrument) -> EngineResult<Signal> {
        let series = self
            .db
            .read_recent_prices(instrument.id, self.indicator_window)
            .await?;
        let indicators = IndicatorCalculator::compute(&series, self.indicator_window);

        Ok(self.signals.decide(&indicators, &instrument.symbol).await)
    }

    /// Filter, size and execute one candidate.
    async fn act(
        &self,
        config: &AutoTradeConfig,
        instrument: &Instrument,
        signal: &Signal,
    ) -> EngineResult<PairOutcome> {
        if !config.admits(signal.confidence) {
            return Ok(PairOutcome::Skipped(format!(
                "confidence {:.2} below threshold {:.2}",
                signal.confidence, config.confidence_threshold
            )));
        }

        let Some(side) = signal.action.trade_side() else {
            return Ok(PairOutcome::Skipped("HOLD signal".to_string()));
        };

        let sizer = PositionSizer::new(config.max_order_size);
        let quantity = match side {
            TradeSide::Buy => {
                let account = self
                    .db
                    .get_account(config.account_id)
                    .await?
                    .ok_or(EngineError::AccountNotFound(config.account_id))?;
                let price = self.execution.latest_price(instrument).await?.price;

                let size = sizer.buy_size(account.cash_balance, price);
                if size == 0 {
                    return Ok(PairOutcome::Skipped(format!(
                        "cash {} does not cover one share at {}",
                        account.cash_balance, price
                    )));
                }
                size
            }
            TradeSide::Sell => {
                let Some(position) = self.db.get_position(config.account_id, instrument.id).await? else {
                    return Ok(PairOutcome::Skipped("no position to sell".to_string()));
                };
                sizer.sell_size(position.quantity)
            }
        };

        let trade = self
            .execution
            .execute(config.account_id, instrument, side, quantity)
            .await?;

        Ok(PairOutcome::Executed(trade))
    }

    fn log_pair(pair: &PairReport) {
        match &pair.outcome {
            PairOutcome::Executed(trade) => info!(
                account = pair.account_id,
                symbol = %pair.symbol,
                side = %trade.side,
                quantity = trade.quantity,
                price = %trade.price,
                "Auto-trade executed"
            ),
            PairOutcome::Skipped(reason) => debug!(
                account = pair.account_id,
                symbol = %pair.symbol,
                reason = %reason,
                "Auto-trade skipped"
            ),
            PairOutcome::Failed(error) => warn!(
                account = pair.account_id,
                symbol = %pair.symbol,
                error = %error,
                "Auto-trade failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutoTradeConfigUpdate, PricePoint, SignalAction};
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        db: Arc<Database>,
        trader: AutoTrader,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let trader = AutoTrader::new(
            db.clone(),
            Arc::new(SignalEngine::rule_based_only()),
            Arc::new(ExecutionEngine::new(db.clone())),
            100,
        );
        Fixture { db, trader }
    }

    /// 60 points moving linearly by `step` from `start`, oldest first.
    async fn linear_series(db: &Database, symbol: &str, start: i64, step: i64) -> Instrument {
        let instrument = db.upsert_instrument(symbol, symbol).await.unwrap();
        let origin = Utc::now() - Duration::hours(2);
        let points: Vec<_> = (0..60)
            .map(|i| {
                PricePoint::new(
                    instrument.id,
                    origin + Duration::minutes(i),
                    Decimal::from(start + step * i),
                    1_000,
                )
            })
            .collect();
        db.append_price_points(&points).await.unwrap();
        instrument
    }

    async fn enabled_account(db: &Database, cash: Decimal, threshold: f64) -> i64 {
        let account = db.create_account("bot", cash, false, 0.7, 5).await.unwrap();
        let mut config = db.get_auto_config(account.id).await.unwrap().unwrap();
        config
            .apply(&AutoTradeConfigUpdate {
                enabled: Some(true),
                confidence_threshold: Some(threshold),
                max_order_size: None,
            })
            .unwrap();
        db.save_auto_config(&config).await.unwrap();
        account.id
    }

    #[tokio::test]
    async fn test_no_enabled_accounts_is_noop() {
        let f = fixture().await;
        linear_series(&f.db, "AAPL", 200, -1).await;
        let account = f.db.create_account("idle", dec!(10000), false, 0.7, 5).await.unwrap();

        let report = f.trader.run_cycle().await.unwrap();
        assert_eq!(report.accounts, 0);
        assert!(report.pairs.is_empty());
        assert!(f.db.list_trades(account.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signal_below_threshold_is_not_traded() {
        let f = fixture().await;
        // Steady decline: oversold BUY at 0.70 with no confirmations
        linear_series(&f.db, "AAPL", 200, -1).await;
        let account_id = enabled_account(&f.db, dec!(10000), 0.8).await;

        let report = f.trader.run_cycle().await.unwrap();
        assert_eq!(report.pairs.len(), 1);

        let pair = &report.pairs[0];
        let signal = pair.signal.as_ref().unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.confidence < 0.8);
        assert!(matches!(pair.outcome, PairOutcome::Skipped(_)));
        assert!(f.db.list_trades(account_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confidence_equal_to_threshold_executes() {
        let f = fixture().await;
        let instrument = linear_series(&f.db, "AAPL", 200, -1).await;
        let account_id = enabled_account(&f.db, dec!(10000), 0.7).await;

        let report = f.trader.run_cycle().await.unwrap();
        let trades: Vec<_> = report.executed().collect();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(trades[0].quantity, 5);

        let position = f.db.get_position(account_id, instrument.id).await.unwrap().unwrap();
        assert_eq!(position.quantity, 5);
        // Last price of the series is 200 - 59
        assert_eq!(position.avg_cost, dec!(141));
    }

    #[tokio::test]
    async fn test_unaffordable_and_unheld_candidates_are_skipped() {
        let f = fixture().await;
        linear_series(&f.db, "FALL", 200, -1).await; // BUY at 141
        linear_series(&f.db, "RISE", 100, 1).await; // SELL, nothing held
        let account_id = enabled_account(&f.db, dec!(100), 0.5).await;

        let report = f.trader.run_cycle().await.unwrap();
        assert_eq!(report.pairs.len(), 2);
        assert_eq!(report.skipped_count(), 2);
        assert_eq!(report.executed().count(), 0);
        assert!(f.db.list_trades(account_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_instrument_does_not_stop_cycle() {
        let f = fixture().await;
        let broken = f.db.upsert_instrument("BAD", "Broken feed").await.unwrap();
        sqlx::query("INSERT INTO price_points (instrument_id, price, volume, timestamp) VALUES (?, 'n/a', 0, ?)")
            .bind(broken.id)
            .bind(Utc::now())
            .execute(f.db.pool())
            .await
            .unwrap();
        linear_series(&f.db, "GOOD", 200, -1).await;
        enabled_account(&f.db, dec!(10000), 0.7).await;
        enabled_account(&f.db, dec!(10000), 0.7).await;

        let report = f.trader.run_cycle().await.unwrap();
        assert_eq!(report.accounts, 2);
        assert_eq!(report.pairs.len(), 4);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.executed().count(), 2);
        assert!(report
            .pairs
            .iter()
            .filter(|p| p.symbol == "BAD")
            .all(|p| matches!(p.outcome, PairOutcome::Failed(_))));
    }
}
