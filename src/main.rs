//! Paper-Trading Engine
//!
//! Simulated price feeds, technical indicators, confidence-gated signals and
//! an auto-trader that executes against per-account cash and positions.

mod api;
mod auto_trader;
mod db;
mod error;
mod indicators;
mod models;
mod scheduler;
mod service;
mod simulator;
mod trading;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{AdvisoryClient, DEFAULT_MODEL};
use crate::auto_trader::{AutoTrader, PairOutcome};
use crate::db::Database;
use crate::error::{AdvisoryError, EngineError};
use crate::models::{AutoTradeConfigUpdate, TradeSide};
use crate::scheduler::{Job, Scheduler, SchedulerConfig};
use crate::service::TradingService;
use crate::simulator::{PriceSimulator, SimulatorConfig};
use crate::trading::{SignalEngine, TradingConfig};

/// How long startup keeps retrying an unreachable database.
const DB_CONNECT_DEADLINE: Duration = Duration::from_secs(60);

/// Paper-trading engine CLI.
#[derive(Parser)]
#[command(name = "papertrade")]
#[command(about = "Simulated market with indicator-driven auto-trading", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./papertrade.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Advisory API key; without one every signal is rule-based
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Advisory model name
    #[arg(long, env = "ADVISORY_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Advisory request timeout in seconds
    #[arg(long, env = "ADVISORY_TIMEOUT_SECS", default_value = "30")]
    advisory_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the instrument catalog and backfill price history
    Init,

    /// Run the price tick and auto-trading jobs until Ctrl+C
    Run {
        /// Seconds between price ticks
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Seconds between auto-trading cycles
        #[arg(long)]
        trade_secs: Option<u64>,
    },

    /// List instruments with their latest prices
    Tickers,

    /// Show recent prices for an instrument, newest first
    Prices {
        symbol: String,

        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Show technical indicators for an instrument
    Indicators { symbol: String },

    /// Show the current trading signal for an instrument
    Signal { symbol: String },

    /// Open a paper-trading account
    OpenAccount {
        #[arg(short, long)]
        owner: String,

        /// Starting cash (defaults to 10000.00)
        #[arg(short, long)]
        cash: Option<Decimal>,
    },

    /// Execute a market order
    Trade {
        #[arg(short, long)]
        account: i64,

        symbol: String,

        /// BUY or SELL
        side: TradeSide,

        quantity: i64,
    },

    /// Show holdings valued at the latest prices
    Portfolio {
        #[arg(short, long)]
        account: i64,
    },

    /// Show trade history, newest first
    History {
        #[arg(short, long)]
        account: i64,
    },

    /// Show or change auto-trading settings
    AutoConfig {
        #[arg(short, long)]
        account: i64,

        #[arg(long)]
        enabled: Option<bool>,

        /// Minimum confidence (0.0 to 1.0)
        #[arg(long)]
        threshold: Option<f64>,

        /// Largest automatic order in shares
        #[arg(long)]
        max_order_size: Option<i64>,
    },

    /// Run one auto-trading cycle now
    AutoCycle,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let db = Arc::new(connect_with_retry(&cli.database).await?);

    let config = TradingConfig {
        advisory_model: cli.model.clone(),
        advisory_timeout_secs: cli.advisory_timeout,
        ..TradingConfig::default()
    };
    let signals = Arc::new(SignalEngine::new(build_advisor(cli.api_key.as_deref(), &config)));
    let service = TradingService::new(db.clone(), signals.clone(), config.clone());

    match cli.command {
        Commands::Init => {
            initialize(&db).await?;
        }

        Commands::Run {
            tick_secs,
            trade_secs,
        } => {
            let defaults = SchedulerConfig::default();
            let schedule = SchedulerConfig {
                price_tick_secs: tick_secs.unwrap_or(defaults.price_tick_secs).max(1),
                auto_trade_secs: trade_secs.unwrap_or(defaults.auto_trade_secs).max(1),
            };

            initialize(&db).await?;

            let trader = Arc::new(AutoTrader::new(
                db.clone(),
                signals.clone(),
                service.execution(),
                config.indicator_window,
            ));
            let scheduler = Scheduler::new(vec![
                Job::price_tick(
                    PriceSimulator::new(db.clone(), SimulatorConfig::default()),
                    Duration::from_secs(schedule.price_tick_secs),
                ),
                Job::auto_trade(trader, Duration::from_secs(schedule.auto_trade_secs)),
            ]);

            let shutdown = scheduler.shutdown_handle();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
                shutdown.trigger();
            });

            println!("\n=== Paper-Trading Engine ===");
            println!("Price ticks:  every {}s", schedule.price_tick_secs);
            println!("Auto-trading: every {}s", schedule.auto_trade_secs);
            println!(
                "Signals:      {}",
                if signals.has_advisor() { "advisory with rule-based fallback" } else { "rule-based" }
            );
            println!("\nPress Ctrl+C to stop.\n");

            scheduler.run().await?;
        }

        Commands::Tickers => {
            let quotes = service.get_tickers().await?;
            if quotes.is_empty() {
                println!("No instruments. Run 'papertrade init' first.");
                return Ok(());
            }

            println!("\n{:<8} {:<30} {:>12} {:>22}", "SYMBOL", "NAME", "LAST", "AS OF");
            println!("{}", "-".repeat(75));
            for quote in quotes {
                let (last, as_of) = match &quote.last {
                    Some(p) => (format!("{:.2}", p.price), p.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                    None => ("-".to_string(), "-".to_string()),
                };
                println!(
                    "{:<8} {:<30} {:>12} {:>22}",
                    quote.instrument.symbol,
                    truncate(&quote.instrument.name, 28),
                    last,
                    as_of
                );
            }
        }

        Commands::Prices { symbol, limit } => {
            let points = report(service.get_price_history(&symbol, limit).await)?;
            println!("\n{:<22} {:>12} {:>12}", "TIMESTAMP", "PRICE", "VOLUME");
            println!("{}", "-".repeat(48));
            for p in points {
                println!(
                    "{:<22} {:>12.2} {:>12}",
                    p.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    p.price,
                    p.volume
                );
            }
        }

        Commands::Indicators { symbol } => {
            let indicators = report(service.get_indicators(&symbol).await)?;
            println!("\n=== {} ({} points) ===", symbol.to_uppercase(), indicators.points_used);
            for (name, value) in indicators.entries() {
                match value {
                    Some(v) => println!("{:<18} {:>12.4}", name, v),
                    None => println!("{:<18} {:>12}", name, "N/A"),
                }
            }
        }

        Commands::Signal { symbol } => {
            let signal = report(service.get_signal(&symbol).await)?;
            println!("\n=== {} ===", symbol.to_uppercase());
            println!("Action:     {}", signal.action);
            println!("Confidence: {:.2}", signal.confidence);
            println!("Reason:     {}", signal.reason);
            println!("Source:     {:?}", signal.source);
        }

        Commands::OpenAccount { owner, cash } => {
            let account = report(service.open_account(&owner, cash).await)?;
            println!("Opened account {} for {} with ${:.2}", account.id, account.owner, account.cash_balance);
        }

        Commands::Trade {
            account,
            symbol,
            side,
            quantity,
        } => {
            let trade = report(service.execute_trade(account, &symbol, side, quantity).await)?;
            println!(
                "{} {} {} @ ${:.2} = ${:.2} (cash now ${:.2})",
                trade.side, trade.quantity, trade.symbol, trade.price, trade.total_amount, trade.cash_after
            );
        }

        Commands::Portfolio { account } => {
            let portfolio = report(service.get_portfolio(account).await)?;

            println!("\n=== Account {} ===", portfolio.account_id);
            println!("Cash:           ${:.2}", portfolio.cash_balance);
            println!("Market Value:   ${:.2}", portfolio.market_value);
            println!("Unrealized P&L: ${:.2}", portfolio.unrealized_pnl);
            println!("Total Value:    ${:.2}", portfolio.total_value());

            if portfolio.positions.is_empty() {
                println!("\nNo open positions.");
            } else {
                println!(
                    "\n{:<8} {:>8} {:>12} {:>12} {:>14} {:>12}",
                    "SYMBOL", "QTY", "AVG COST", "LAST", "VALUE", "P&L"
                );
                println!("{}", "-".repeat(71));
                for pos in &portfolio.positions {
                    println!(
                        "{:<8} {:>8} {:>12.2} {:>12.2} {:>14.2} {:>12.2}",
                        pos.symbol,
                        pos.quantity,
                        pos.avg_cost,
                        pos.last_price,
                        pos.market_value(),
                        pos.unrealized_pnl()
                    );
                }
            }
        }

        Commands::History { account } => {
            let trades = report(service.get_trade_history(account).await)?;
            if trades.is_empty() {
                println!("No trades yet.");
                return Ok(());
            }

            println!(
                "\n{:<20} {:<5} {:<8} {:>6} {:>12} {:>14} {:>14}",
                "TIME", "SIDE", "SYMBOL", "QTY", "PRICE", "TOTAL", "CASH AFTER"
            );
            println!("{}", "-".repeat(85));
            for t in trades {
                println!(
                    "{:<20} {:<5} {:<8} {:>6} {:>12.2} {:>14.2} {:>14.2}",
                    t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    t.side,
                    t.symbol,
                    t.quantity,
                    t.price,
                    t.total_amount,
                    t.cash_after
                );
            }
        }

        Commands::AutoConfig {
            account,
            enabled,
            threshold,
            max_order_size,
        } => {
            let update = AutoTradeConfigUpdate {
                enabled,
                confidence_threshold: threshold,
                max_order_size,
            };

            let config = if enabled.is_none() && threshold.is_none() && max_order_size.is_none() {
                report(service.get_auto_config(account).await)?
            } else {
                report(service.update_auto_config(account, &update).await)?
            };

            println!("\n=== Auto-Trading: Account {} ===", config.account_id);
            println!("Enabled:        {}", config.enabled);
            println!("Threshold:      {:.2}", config.confidence_threshold);
            println!("Max Order Size: {}", config.max_order_size);
        }

        Commands::AutoCycle => {
            let trader = AutoTrader::new(db.clone(), signals.clone(), service.execution(), config.indicator_window);
            let cycle = trader.run_cycle().await?;

            if cycle.accounts == 0 {
                println!("No accounts with auto-trading enabled.");
                return Ok(());
            }

            println!("\n{:<8} {:<8} {:<6} {:>6}  {}", "ACCOUNT", "SYMBOL", "SIGNAL", "CONF", "OUTCOME");
            println!("{}", "-".repeat(70));
            for pair in &cycle.pairs {
                let (action, confidence) = pair
                    .signal
                    .as_ref()
                    .map(|s| (s.action.to_string(), format!("{:.2}", s.confidence)))
                    .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
                let outcome = match &pair.outcome {
                    PairOutcome::Executed(t) => format!("{} {} @ {:.2}", t.side, t.quantity, t.price),
                    PairOutcome::Skipped(reason) => format!("skipped: {reason}"),
                    PairOutcome::Failed(error) => format!("failed: {error}"),
                };
                println!(
                    "{:<8} {:<8} {:<6} {:>6}  {}",
                    pair.account_id, pair.symbol, action, confidence, outcome
                );
            }
            println!(
                "\nExecuted {}, skipped {}, failed {}",
                cycle.executed().count(),
                cycle.skipped_count(),
                cycle.failed_count()
            );
        }
    }

    Ok(())
}

/// Connect to the database, retrying with exponential backoff until the
/// deadline passes.
async fn connect_with_retry(url: &str) -> Result<Database> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(DB_CONNECT_DEADLINE),
        ..ExponentialBackoff::default()
    };

    backoff::future::retry_notify(
        policy,
        move || async move { Database::new(url).await.map_err(backoff::Error::transient) },
        |e: anyhow::Error, wait: Duration| {
            warn!(error = %e, retry_in_ms = wait.as_millis() as u64, "Database not ready");
        },
    )
    .await
    .context("Database unreachable")
}

/// Build the advisory client, or `None` to stay on rule-based signals.
fn build_advisor(api_key: Option<&str>, config: &TradingConfig) -> Option<AdvisoryClient> {
    let timeout = Duration::from_secs(config.advisory_timeout_secs);

    match AdvisoryClient::new(api_key.unwrap_or_default(), config.advisory_model.clone(), timeout) {
        Ok(client) => {
            info!(model = %client.model(), "Advisory signals enabled");
            Some(client)
        }
        Err(AdvisoryError::NotConfigured) => {
            info!("No advisory API key, using rule-based signals");
            None
        }
        Err(e) => {
            warn!(error = %e, "Advisory client unavailable, using rule-based signals");
            None
        }
    }
}

/// Create the catalog instruments and their price history.
async fn initialize(db: &Arc<Database>) -> Result<()> {
    let mut simulator = PriceSimulator::new(db.clone(), SimulatorConfig::default());

    let instruments = simulator.bootstrap_instruments().await?;
    info!(count = instruments.len(), "Instruments ready");

    let backfill = simulator.backfill_all().await?;
    for (symbol, points) in &backfill.generated {
        println!("  {symbol}: generated {points} price points");
    }
    for symbol in &backfill.skipped {
        println!("  {symbol}: history present, skipped");
    }
    for (symbol, error) in &backfill.failed {
        println!("  {symbol}: FAILED ({error})");
    }

    Ok(())
}

/// Print a rejected request as its named failure; pass store errors through.
fn report<T>(result: Result<T, EngineError>) -> Result<T> {
    match result {
        Err(e) if e.is_rejection() => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
        other => other.map_err(anyhow::Error::from),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
