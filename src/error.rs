//! Named failures surfaced by the trading engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors returned to direct callers of the engine.
///
/// Every validation failure in execution has its own variant so callers can
/// report it without string matching. Advisory failures are never part of
/// this type; the signal module absorbs them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No pricing data available for {0}")]
    NoPricingData(String),

    #[error("Insufficient funds: required ${required}, available ${available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Insufficient shares: holding {held}, trying to sell {requested}")]
    InsufficientShares { held: i64, requested: i64 },

    #[error("No position found for {0}")]
    NoPosition(String),

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    #[error("Auto-trading config not found for account {0}")]
    ConfigNotFound(i64),

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt stored value: {0}")]
    CorruptValue(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    /// True for failures caused by the request itself rather than the store.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::Database(_) | EngineError::CorruptValue(_))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Why an advisory signal could not be obtained.
///
/// Always recovered by the signal engine, which falls back to the
/// rule-based path.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("Advisory source not configured")]
    NotConfigured,

    #[error("Advisory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Advisory request returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Advisory response rejected: {0}")]
    Decode(#[from] DecodeError),
}

/// A remote recommendation that does not match the signal schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("response contained no text")]
    Empty,

    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}
