//! Alert events recorded by the evaluator

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::iso_time;

/// How an evaluator cycle was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Scheduled invocation; may send digests
    #[default]
    #[serde(rename = "automatico")]
    Automatic,
    /// Operator-triggered invocation; never sends digests
    #[serde(rename = "manual")]
    Manual,
}

impl ExecutionMode {
    pub fn from_manual_flag(manual: bool) -> Self {
        if manual {
            ExecutionMode::Manual
        } else {
            ExecutionMode::Automatic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Automatic => "automatico",
            ExecutionMode::Manual => "manual",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected threshold violation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    #[serde(with = "iso_time")]
    pub timestamp: DateTime<Utc>,
    pub variable: String,
    #[serde(rename = "valor")]
    pub value: f64,
    /// Free-text description of the configured bounds
    #[serde(rename = "umbral")]
    pub threshold_description: String,
    #[serde(rename = "tipo_ejecucion", default)]
    pub execution_mode: ExecutionMode,
    /// Human-readable reason; absent in logs written by older deployments
    #[serde(rename = "motivo", default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}
