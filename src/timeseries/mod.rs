//! Time-series query client
//!
//! The evaluator only needs the most recent scalar for a field within a short
//! look-back window. `InfluxClient` answers that with a Flux query against
//! InfluxDB 2.x.

pub mod influx;

pub use influx::{InfluxClient, InfluxConfig};

use std::time::Duration;

use async_trait::async_trait;

/// Source of current field values
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Most recent value of `field` recorded within `lookback`, if any
    async fn latest_value(&self, field: &str, lookback: Duration) -> Result<Option<f64>, QueryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Query returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),
}
