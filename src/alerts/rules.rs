//! Threshold rules and breach classification

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Thresholds keyed by time-series field name
pub type ThresholdSet = BTreeMap<String, ThresholdRule>;

/// Bounds for one field. An absent bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdRule {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ThresholdRule {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// A rule without bounds never fires
    pub fn is_effective(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Both bounds set with `min > max`; every value then violates one side
    pub fn is_inverted(&self) -> bool {
        matches!((self.min, self.max), (Some(min), Some(max)) if min > max)
    }

    /// Classify `value`. Both bounds are exclusive: a value equal to a bound
    /// is in range.
    pub fn check(&self, field: &str, value: f64) -> Option<Breach> {
        let below_min = self.min.filter(|min| value < *min);
        let above_max = self.max.filter(|max| value > *max);

        if below_min.is_none() && above_max.is_none() {
            return None;
        }

        let mut reasons = Vec::with_capacity(2);
        if let Some(min) = below_min {
            reasons.push(format!(
                "{} ({:.2}) está por debajo del umbral mínimo ({:.2})",
                field, value, min
            ));
        }
        if let Some(max) = above_max {
            reasons.push(format!(
                "{} ({:.2}) está por encima del umbral máximo ({:.2})",
                field, value, max
            ));
        }

        Some(Breach {
            below_min,
            above_max,
            reason: reasons.join(" "),
        })
    }

    /// Description stored alongside alert events, e.g. `Min: 200.00, Max: N/A`
    pub fn describe(&self) -> String {
        fn bound(b: Option<f64>) -> String {
            b.map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "N/A".to_string())
        }
        format!("Min: {}, Max: {}", bound(self.min), bound(self.max))
    }
}

/// Which bounds a value violated
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    /// The violated lower bound
    pub below_min: Option<f64>,
    /// The violated upper bound
    pub above_max: Option<f64>,
    /// Human-readable explanation, both reasons joined when both fire
    pub reason: String,
}
