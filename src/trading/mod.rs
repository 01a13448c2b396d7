//! Trading logic: signals, order sizing and ledger execution.

mod config;
mod execution;
mod position_sizer;
mod signal;

pub use config::TradingConfig;
pub use execution::ExecutionEngine;
pub use position_sizer::PositionSizer;
pub use signal::SignalEngine;
