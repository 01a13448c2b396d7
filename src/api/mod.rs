//! Client for the external advisory source that turns an indicator snapshot
//! into a trading recommendation.

mod advisory_client;
mod types;

pub use advisory_client::{AdvisoryClient, DEFAULT_MODEL};
