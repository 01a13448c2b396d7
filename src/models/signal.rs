//! Trading signal model.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::TradeSide;

/// Recommended action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }

    /// The order side this action calls for, if any.
    pub fn trade_side(&self) -> Option<TradeSide> {
        match self {
            SignalAction::Buy => Some(TradeSide::Buy),
            SignalAction::Sell => Some(TradeSide::Sell),
            SignalAction::Hold => None,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Advisory,
    RuleBased,
}

/// A directional recommendation with a confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,

    /// Confidence in the action (0.0 to 1.0)
    pub confidence: f64,

    /// Human-readable rationale
    pub reason: String,

    pub source: SignalSource,
}
