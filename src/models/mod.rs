//! Data models for instruments, prices, accounts, positions, trades and signals.

mod account;
mod indicators;
mod instrument;
mod position;
mod signal;
mod trade;

pub use account::{Account, AutoTradeConfig, AutoTradeConfigUpdate};
pub use indicators::Indicators;
pub use instrument::{Instrument, PricePoint};
pub use position::Position;
pub use signal::{Signal, SignalAction, SignalSource};
pub use trade::{TradeRecord, TradeSide};
