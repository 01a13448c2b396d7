//! Technical indicators computed from an instrument's recent price window.

mod calculator;

pub use calculator::{IndicatorCalculator, INDICATOR_WINDOW};
