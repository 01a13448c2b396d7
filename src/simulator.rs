//! Synthetic price feed.
//!
//! Prices follow a multiplicative random walk: every step moves the last
//! price by a random fraction of itself, with an occasional small momentum
//! kick in the direction of the move. Prices never drop below a positive
//! floor and are rounded to currency precision.
//!
//! The simulator only appends price points; it never rewrites history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::models::{Instrument, PricePoint};

/// A tradable symbol the venue lists at bootstrap.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub symbol: &'static str,
    pub name: &'static str,
    pub initial_price: Decimal,
}

/// Instruments created by [`PriceSimulator::bootstrap_instruments`].
pub const INSTRUMENT_CATALOG: [CatalogEntry; 10] = [
    CatalogEntry { symbol: "AAPL", name: "Apple Inc.", initial_price: dec!(150.00) },
    CatalogEntry { symbol: "GOOGL", name: "Alphabet Inc.", initial_price: dec!(140.00) },
    CatalogEntry { symbol: "MSFT", name: "Microsoft Corporation", initial_price: dec!(380.00) },
    CatalogEntry { symbol: "TSLA", name: "Tesla Inc.", initial_price: dec!(250.00) },
    CatalogEntry { symbol: "AMZN", name: "Amazon.com Inc.", initial_price: dec!(180.00) },
    CatalogEntry { symbol: "NVDA", name: "NVIDIA Corporation", initial_price: dec!(500.00) },
    CatalogEntry { symbol: "META", name: "Meta Platforms Inc.", initial_price: dec!(350.00) },
    CatalogEntry { symbol: "NFLX", name: "Netflix Inc.", initial_price: dec!(450.00) },
    CatalogEntry { symbol: "AMD", name: "Advanced Micro Devices Inc.", initial_price: dec!(120.00) },
    CatalogEntry { symbol: "INTC", name: "Intel Corporation", initial_price: dec!(45.00) },
];

/// Starting price for symbols missing from the catalog.
const FALLBACK_INITIAL_PRICE: Decimal = dec!(100.00);

/// Registered initial price of a symbol.
pub fn initial_price(symbol: &str) -> Decimal {
    INSTRUMENT_CATALOG
        .iter()
        .find(|entry| entry.symbol == symbol)
        .map_or(FALLBACK_INITIAL_PRICE, |entry| entry.initial_price)
}

/// Price process parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Mean per-step volatility
    pub base_volatility: f64,

    /// Uniform jitter applied to the volatility each step
    pub volatility_range: f64,

    /// Chance of a trend-continuation kick per step
    pub momentum_probability: f64,

    /// Size of the kick as a fraction of the last price
    pub momentum_factor: f64,

    /// Lowest price the simulator will emit
    pub min_price: Decimal,

    /// Fractional digits prices are rounded to
    pub price_precision: u32,

    pub volume_min: i64,
    pub volume_max: i64,

    /// Length of the historical backfill window
    pub history_days: i64,

    /// Spacing of historical points
    pub history_interval_minutes: i64,

    /// Points per backfill commit
    pub batch_size: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_volatility: 0.02,
            volatility_range: 0.005,
            momentum_probability: 0.3,
            momentum_factor: 0.001,
            min_price: dec!(1.00),
            price_precision: 2,
            volume_min: 100_000,
            volume_max: 10_000_000,
            history_days: 180,
            history_interval_minutes: 5,
            batch_size: 1000,
        }
    }
}

/// Outcome of [`PriceSimulator::backfill_all`].
#[derive(Debug, Default)]
pub struct BackfillReport {
    /// Symbols that received history, with the number of points written
    pub generated: Vec<(String, usize)>,

    /// Symbols that already had data
    pub skipped: Vec<String>,

    pub failed: Vec<(String, String)>,
}

/// Outcome of [`PriceSimulator::tick_all`].
#[derive(Debug, Default)]
pub struct TickReport {
    pub ticked: Vec<(String, Decimal)>,
    pub failed: Vec<(String, String)>,
}

/// Generates historical and live price points.
pub struct PriceSimulator {
    db: Arc<Database>,
    config: SimulatorConfig,
    rng: StdRng,
}

impl PriceSimulator {
    pub fn new(db: Arc<Database>, config: SimulatorConfig) -> Self {
        Self {
            db,
            config,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Create a simulator with a reproducible price path.
    pub fn with_seed(db: Arc<Database>, config: SimulatorConfig, seed: u64) -> Self {
        Self {
            db,
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Apply one step of the price process to `last_price`.
    pub fn next_price(&mut self, last_price: Decimal) -> Decimal {
        let cfg = &self.config;
        let min = cfg.min_price.to_f64().unwrap_or(1.0);
        let last = last_price.to_f64().unwrap_or(min);

        let range = cfg.volatility_range.abs();
        let volatility = cfg.base_volatility + self.rng.random_range(-range..=range);
        let direction: f64 = self.rng.random_range(-1.0..=1.0);
        let delta = last * volatility * direction;

        let mut next = (last + delta).max(min);

        if self.rng.random_bool(cfg.momentum_probability.clamp(0.0, 1.0)) {
            let trend = if delta > 0.0 { 1.0 } else { -1.0 };
            next += last * cfg.momentum_factor * trend;
        }

        Decimal::from_f64(next)
            .unwrap_or(cfg.min_price)
            .round_dp(cfg.price_precision)
            .max(cfg.min_price)
    }

    fn next_volume(&mut self) -> i64 {
        let (lo, hi) = (self.config.volume_min, self.config.volume_max);
        if lo >= hi {
            return lo.max(0);
        }
        self.rng.random_range(lo..=hi)
    }

    /// Write a single opening point unless the series already has data.
    ///
    /// Returns whether a point was written.
    pub async fn seed(&mut self, instrument: &Instrument, initial_price: Decimal) -> EngineResult<bool> {
        if self.db.count_price_points(instrument.id).await? > 0 {
            return Ok(false);
        }

        let volume = self.next_volume();
        let point = PricePoint::new(instrument.id, Utc::now(), initial_price, volume);
        self.db.append_price_points(&[point]).await?;

        debug!(symbol = %instrument.symbol, price = %initial_price, "Seeded price series");
        Ok(true)
    }

    /// Generate one point every `interval` from `start` to `end` inclusive,
    /// starting from the instrument's registered initial price.
    ///
    /// Does nothing if the series already has data. Points are committed in
    /// batches, so an interrupted backfill leaves a valid prefix.
    pub async fn backfill(
        &mut self,
        instrument: &Instrument,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> EngineResult<usize> {
        if interval <= Duration::zero() {
            return Err(EngineError::InvalidConfig(format!(
                "backfill interval must be positive, got {interval}"
            )));
        }

        let existing = self.db.count_price_points(instrument.id).await?;
        if existing > 0 {
            debug!(symbol = %instrument.symbol, existing = existing, "Series has data, skipping backfill");
            return Ok(0);
        }

        let batch_size = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut price = initial_price(&instrument.symbol);
        let mut timestamp = start;
        let mut written = 0;

        while timestamp <= end {
            price = self.next_price(price);
            let volume = self.next_volume();
            batch.push(PricePoint::new(instrument.id, timestamp, price, volume));

            if batch.len() >= batch_size {
                self.db.append_price_points(&batch).await?;
                written += batch.len();
                batch.clear();
                debug!(symbol = %instrument.symbol, written = written, "Backfill batch committed");
            }

            timestamp += interval;
        }

        if !batch.is_empty() {
            self.db.append_price_points(&batch).await?;
            written += batch.len();
        }

        info!(symbol = %instrument.symbol, points = written, "Generated historical prices");
        Ok(written)
    }

    /// Append one live point based on the latest price, or on the
    /// registered initial price when the series is empty.
    pub async fn tick(&mut self, instrument: &Instrument) -> EngineResult<PricePoint> {
        let last = match self.db.latest_price(instrument.id).await? {
            Some(point) => point.price,
            None => initial_price(&instrument.symbol),
        };

        let price = self.next_price(last);
        let volume = self.next_volume();
        let point = PricePoint::new(instrument.id, Utc::now(), price, volume);
        self.db.append_price_points(std::slice::from_ref(&point)).await?;

        Ok(point)
    }

    /// Create every catalog instrument, refreshing display names of
    /// existing ones.
    pub async fn bootstrap_instruments(&self) -> EngineResult<Vec<Instrument>> {
        let mut instruments = Vec::with_capacity(INSTRUMENT_CATALOG.len());

        for entry in &INSTRUMENT_CATALOG {
            let existed = self.db.find_instrument(entry.symbol).await?.is_some();
            let instrument = self.db.upsert_instrument(entry.symbol, entry.name).await?;

            if existed {
                debug!(symbol = %entry.symbol, "Instrument already exists");
            } else {
                info!(symbol = %entry.symbol, name = %entry.name, "Created instrument");
            }
            instruments.push(instrument);
        }

        Ok(instruments)
    }

    /// Backfill the configured history window for every instrument. With no
    /// history window, each empty series gets a single opening point.
    pub async fn backfill_all(&mut self) -> EngineResult<BackfillReport> {
        let instruments = self.db.list_instruments().await?;
        let end = Utc::now();
        let start = end - Duration::days(self.config.history_days);
        let interval = Duration::minutes(self.config.history_interval_minutes);

        let mut report = BackfillReport::default();
        for instrument in &instruments {
            let result = if self.config.history_days <= 0 {
                let opening = initial_price(&instrument.symbol);
                self.seed(instrument, opening).await.map(usize::from)
            } else {
                self.backfill(instrument, start, end, interval).await
            };

            match result {
                Ok(0) => report.skipped.push(instrument.symbol.clone()),
                Ok(n) => report.generated.push((instrument.symbol.clone(), n)),
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "Backfill failed");
                    report.failed.push((instrument.symbol.clone(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// One tick for every instrument. A failure on one instrument does not
    /// stop the others.
    pub async fn tick_all(&mut self) -> EngineResult<TickReport> {
        let instruments = self.db.list_instruments().await?;

        let mut report = TickReport::default();
        for instrument in &instruments {
            match self.tick(instrument).await {
                Ok(point) => report.ticked.push((instrument.symbol.clone(), point.price)),
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "Price tick failed");
                    report.failed.push((instrument.symbol.clone(), e.to_string()));
                }
            }
        }

        debug!(ticked = report.ticked.len(), failed = report.failed.len(), "Price tick complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn simulator(config: SimulatorConfig) -> (Arc<Database>, PriceSimulator) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let sim = PriceSimulator::with_seed(db.clone(), config, 42);
        (db, sim)
    }

    #[tokio::test]
    async fn test_price_never_below_floor() {
        let (_db, mut sim) = simulator(SimulatorConfig::default()).await;

        let mut price = dec!(1.00);
        for _ in 0..10_000 {
            price = sim.next_price(price);
            assert!(price >= dec!(1.00));
            assert!(price.scale() <= 2);
        }
    }

    #[tokio::test]
    async fn test_step_is_bounded() {
        let (_db, mut sim) = simulator(SimulatorConfig::default()).await;

        // Worst case: 2.5% move plus 0.1% momentum, plus rounding
        for _ in 0..1_000 {
            let next = sim.next_price(dec!(200.00));
            assert!((next - dec!(200.00)).abs() <= dec!(5.21), "step too large: {next}");
        }
    }

    #[tokio::test]
    async fn test_seeded_paths_repeat() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let mut a = PriceSimulator::with_seed(db.clone(), SimulatorConfig::default(), 7);
        let mut b = PriceSimulator::with_seed(db, SimulatorConfig::default(), 7);

        let (mut pa, mut pb) = (dec!(100), dec!(100));
        for _ in 0..50 {
            pa = a.next_price(pa);
            pb = b.next_price(pb);
            assert_eq!(pa, pb);
        }
    }

    #[tokio::test]
    async fn test_backfill_is_idempotent() {
        let config = SimulatorConfig {
            batch_size: 5,
            ..SimulatorConfig::default()
        };
        let (db, mut sim) = simulator(config).await;
        let instrument = db.upsert_instrument("AAPL", "Apple Inc.").await.unwrap();

        let end = Utc::now();
        let start = end - Duration::hours(1);

        // 0, 5, ..., 60 minutes inclusive
        let written = sim.backfill(&instrument, start, end, Duration::minutes(5)).await.unwrap();
        assert_eq!(written, 13);
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 13);

        let again = sim.backfill(&instrument, start, end, Duration::minutes(5)).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 13);

        let latest = db.latest_price(instrument.id).await.unwrap().unwrap();
        assert!(latest.timestamp > start);
        assert!(latest.timestamp <= end);
    }

    #[tokio::test]
    async fn test_backfill_rejects_empty_interval() {
        let (db, mut sim) = simulator(SimulatorConfig::default()).await;
        let instrument = db.upsert_instrument("AAPL", "Apple Inc.").await.unwrap();

        let now = Utc::now();
        let result = sim.backfill(&instrument, now, now, Duration::zero()).await;
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_seed_only_once() {
        let (db, mut sim) = simulator(SimulatorConfig::default()).await;
        let instrument = db.upsert_instrument("INTC", "Intel Corporation").await.unwrap();

        assert!(sim.seed(&instrument, dec!(45.00)).await.unwrap());
        assert!(!sim.seed(&instrument, dec!(45.00)).await.unwrap());
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_backfill_all_seeds_without_history_window() {
        let config = SimulatorConfig {
            history_days: 0,
            ..SimulatorConfig::default()
        };
        let (db, mut sim) = simulator(config).await;
        let instrument = db.upsert_instrument("AMD", "Advanced Micro Devices").await.unwrap();

        let report = sim.backfill_all().await.unwrap();
        assert_eq!(report.generated, vec![("AMD".to_string(), 1)]);

        let latest = db.latest_price(instrument.id).await.unwrap().unwrap();
        assert_eq!(latest.price, initial_price("AMD"));

        let report = sim.backfill_all().await.unwrap();
        assert_eq!(report.skipped, vec!["AMD".to_string()]);
    }

    #[tokio::test]
    async fn test_tick_falls_back_to_initial_price() {
        let (db, mut sim) = simulator(SimulatorConfig::default()).await;
        let instrument = db.upsert_instrument("NVDA", "NVIDIA Corporation").await.unwrap();

        let point = sim.tick(&instrument).await.unwrap();
        assert!((point.price - dec!(500.00)).abs() <= dec!(13.01));
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 1);

        let next = sim.tick(&instrument).await.unwrap();
        assert!(next.timestamp >= point.timestamp);
        assert_eq!(db.count_price_points(instrument.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_and_tick_all() {
        let (db, mut sim) = simulator(SimulatorConfig::default()).await;

        let created = sim.bootstrap_instruments().await.unwrap();
        assert_eq!(created.len(), INSTRUMENT_CATALOG.len());

        // Second bootstrap creates nothing new
        sim.bootstrap_instruments().await.unwrap();
        assert_eq!(db.list_instruments().await.unwrap().len(), INSTRUMENT_CATALOG.len());

        let report = sim.tick_all().await.unwrap();
        assert_eq!(report.ticked.len(), INSTRUMENT_CATALOG.len());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_catalog_lookup() {
        assert_eq!(initial_price("MSFT"), dec!(380.00));
        assert_eq!(initial_price("UNKNOWN"), dec!(100.00));
    }
}
