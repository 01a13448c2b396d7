//! Signal engine: indicators in, BUY/SELL/HOLD recommendation out.
//!
//! The advisory source is tried first when one is configured. Any failure
//! there is logged and answered by the deterministic rule-based path, so
//! callers always receive a signal.

use tracing::{debug, warn};

use crate::api::AdvisoryClient;
use crate::models::{Indicators, Signal, SignalAction, SignalSource};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

const BASE_CONFIDENCE: f64 = 0.70;
const NEUTRAL_CONFIDENCE: f64 = 0.50;

const MACD_BOOST: f64 = 0.15;
const MACD_CAP: f64 = 0.85;

const CROSSOVER_BOOST: f64 = 0.10;
const CROSSOVER_CAP: f64 = 0.90;

/// Produces trading signals from indicator snapshots.
pub struct SignalEngine {
    advisor: Option<AdvisoryClient>,
}

impl SignalEngine {
    /// Create an engine. `None` selects the rule-based path for every call.
    pub fn new(advisor: Option<AdvisoryClient>) -> Self {
        Self { advisor }
    }

    pub fn rule_based_only() -> Self {
        Self { advisor: None }
    }

    pub fn has_advisor(&self) -> bool {
        self.advisor.is_some()
    }

    /// Decide on an action for `symbol`. Never fails.
    pub async fn decide(&self, indicators: &Indicators, symbol: &str) -> Signal {
        if let Some(advisor) = &self.advisor {
            match advisor.request_signal(indicators, symbol).await {
                Ok(signal) => {
                    debug!(
                        symbol = %symbol,
                        action = %signal.action,
                        confidence = signal.confidence,
                        "Advisory signal"
                    );
                    return signal;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Advisor unavailable, using rule-based signal");
                }
            }
        }

        Self::rule_based(indicators)
    }

    /// Deterministic signal from RSI, confirmed by MACD and the SMA crossover.
    ///
    /// A confirmation only ever raises confidence, and only when the
    /// indicator it needs is available.
    pub fn rule_based(indicators: &Indicators) -> Signal {
        let (action, mut confidence, mut reason) = match indicators.rsi_14 {
            Some(rsi) if rsi < RSI_OVERSOLD => (
                SignalAction::Buy,
                BASE_CONFIDENCE,
                format!("RSI ({rsi:.2}) indicates oversold conditions"),
            ),
            Some(rsi) if rsi > RSI_OVERBOUGHT => (
                SignalAction::Sell,
                BASE_CONFIDENCE,
                format!("RSI ({rsi:.2}) indicates overbought conditions"),
            ),
            _ => (
                SignalAction::Hold,
                NEUTRAL_CONFIDENCE,
                "Insufficient data for clear signal".to_string(),
            ),
        };

        if let Some(histogram) = indicators.macd_histogram {
            match action {
                SignalAction::Buy if histogram > 0.0 => {
                    confidence = (confidence + MACD_BOOST).min(MACD_CAP);
                    reason.push_str(" with positive MACD momentum");
                }
                SignalAction::Sell if histogram < 0.0 => {
                    confidence = (confidence + MACD_BOOST).min(MACD_CAP);
                    reason.push_str(" with negative MACD momentum");
                }
                _ => {}
            }
        }

        if let (Some(fast), Some(slow)) = (indicators.sma_20, indicators.sma_50) {
            match action {
                SignalAction::Buy if fast > slow => {
                    confidence = (confidence + CROSSOVER_BOOST).min(CROSSOVER_CAP);
                    reason.push_str(" and bullish MA crossover");
                }
                SignalAction::Sell if fast < slow => {
                    confidence = (confidence + CROSSOVER_BOOST).min(CROSSOVER_CAP);
                    reason.push_str(" and bearish MA crossover");
                }
                _ => {}
            }
        }

        Signal {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
            source: SignalSource::RuleBased,
        }
    }
}
