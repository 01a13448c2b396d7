//! Accounts and their auto-trading settings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A paper-trading account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,

    /// Owner identity as provided by the (external) user directory
    pub owner: String,

    /// Uninvested cash
    pub cash_balance: Decimal,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Per-account auto-trading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTradeConfig {
    pub account_id: i64,

    /// Whether the recurring cycle trades on this account's behalf
    pub enabled: bool,

    /// Signals below this confidence are dropped (0.0 to 1.0)
    pub confidence_threshold: f64,

    /// Upper bound on shares per automatic order
    pub max_order_size: i64,

    pub updated_at: DateTime<Utc>,
}

impl AutoTradeConfig {
    /// Whether a signal with this confidence is strong enough to act on.
    ///
    /// Confidence exactly equal to the threshold passes.
    pub fn admits(&self, confidence: f64) -> bool {
        confidence >= self.confidence_threshold
    }

    /// Apply a partial update, validating the resulting settings.
    pub fn apply(&mut self, update: &AutoTradeConfigUpdate) -> EngineResult<()> {
        if let Some(threshold) = update.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::InvalidConfig(format!(
                    "confidence_threshold must be within [0, 1], got {threshold}"
                )));
            }
        }
        if let Some(size) = update.max_order_size {
            if size <= 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "max_order_size must be positive, got {size}"
                )));
            }
        }

        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(threshold) = update.confidence_threshold {
            self.confidence_threshold = threshold;
        }
        if let Some(size) = update.max_order_size {
            self.max_order_size = size;
        }
        self.updated_at = Utc::now();

        Ok(())
    }
}

/// Partial update of an [`AutoTradeConfig`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoTradeConfigUpdate {
    pub enabled: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub max_order_size: Option<i64>,
}
