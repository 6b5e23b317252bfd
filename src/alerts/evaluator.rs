//! One evaluation pass over every configured threshold

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::event::{AlertEvent, ExecutionMode};
use super::rules::ThresholdSet;
use crate::store::AlertLogStore;
use crate::timeseries::TimeSeriesSource;

/// Default recency bound for a value to count as current
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(120);

/// Result of evaluating a single field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldOutcome {
    InRange { field: String, value: f64 },
    Breached { event: AlertEvent },
    NoData { field: String },
    Failed { field: String, error: String },
}

impl FieldOutcome {
    pub fn field(&self) -> &str {
        match self {
            FieldOutcome::InRange { field, .. }
            | FieldOutcome::NoData { field }
            | FieldOutcome::Failed { field, .. } => field,
            FieldOutcome::Breached { event } => &event.variable,
        }
    }
}

/// Everything one cycle observed
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub mode: ExecutionMode,
    /// The cycle's `now`; every event carries this timestamp
    pub started_at: DateTime<Utc>,
    /// One entry per field with a rule
    pub outcomes: Vec<FieldOutcome>,
    /// Events detected in this cycle, in field order
    pub new_alerts: Vec<AlertEvent>,
}

impl CycleReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FieldOutcome::Failed { .. }))
            .count()
    }

    /// At least one rule was configured and every query failed
    pub fn is_total_failure(&self) -> bool {
        !self.outcomes.is_empty() && self.failed_count() == self.outcomes.len()
    }
}

/// Compares the latest value of each field against its rule
pub struct AlertEvaluator<'a> {
    source: &'a dyn TimeSeriesSource,
    log: &'a AlertLogStore,
    lookback: Duration,
}

impl<'a> AlertEvaluator<'a> {
    pub fn new(source: &'a dyn TimeSeriesSource, log: &'a AlertLogStore) -> Self {
        Self {
            source,
            log,
            lookback: DEFAULT_LOOKBACK,
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Evaluate every rule. A failed query for one field is logged and the
    /// pass continues with the next. Each breach is appended to the alert
    /// log as soon as it is detected.
    pub async fn run_cycle(
        &self,
        rules: &ThresholdSet,
        mode: ExecutionMode,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let mut outcomes = Vec::with_capacity(rules.len());
        let mut new_alerts = Vec::new();

        for (field, rule) in rules {
            if rule.is_inverted() {
                tracing::warn!(field = %field, "Threshold min is greater than max");
            }

            let value = match self.source.latest_value(field, self.lookback).await {
                Ok(Some(value)) => value,
                Ok(None) => {
                    tracing::info!(
                        field = %field,
                        lookback_secs = self.lookback.as_secs(),
                        "No recent value found"
                    );
                    outcomes.push(FieldOutcome::NoData {
                        field: field.clone(),
                    });
                    continue;
                }
                Err(e) => {
                    tracing::error!(field = %field, error = %e, "Time-series query failed");
                    outcomes.push(FieldOutcome::Failed {
                        field: field.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let Some(breach) = rule.check(field, value) else {
                tracing::info!(field = %field, value = %format!("{:.2}", value), "OK, within thresholds");
                outcomes.push(FieldOutcome::InRange {
                    field: field.clone(),
                    value,
                });
                continue;
            };

            tracing::warn!(mode = %mode, "ALERT: {}", breach.reason);

            let event = AlertEvent {
                timestamp: now,
                variable: field.clone(),
                value,
                threshold_description: rule.describe(),
                execution_mode: mode,
                reason: breach.reason,
            };

            if let Err(e) = self.log.append(event.clone()) {
                tracing::error!(field = %field, error = %e, "Failed to write alert log");
            }

            new_alerts.push(event.clone());
            outcomes.push(FieldOutcome::Breached { event });
        }

        CycleReport {
            mode,
            started_at: now,
            outcomes,
            new_alerts,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerts::ThresholdRule;
    use crate::timeseries::QueryError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Fixed answers per field; unknown fields have no data
    #[derive(Default)]
    pub(crate) struct FixedSource {
        pub values: HashMap<String, f64>,
        pub failing: Vec<String>,
    }

    impl FixedSource {
        pub fn with(mut self, field: &str, value: f64) -> Self {
            self.values.insert(field.to_string(), value);
            self
        }

        pub fn failing(mut self, field: &str) -> Self {
            self.failing.push(field.to_string());
            self
        }
    }

    #[async_trait]
    impl TimeSeriesSource for FixedSource {
        async fn latest_value(&self, field: &str, _lookback: Duration) -> Result<Option<f64>, QueryError> {
            if self.failing.iter().any(|f| f == field) {
                return Err(QueryError::Network("connection refused".to_string()));
            }
            Ok(self.values.get(field).copied())
        }
    }

    fn rules(entries: &[(&str, Option<f64>, Option<f64>)]) -> ThresholdSet {
        entries
            .iter()
            .map(|(f, min, max)| (f.to_string(), ThresholdRule::new(*min, *max)))
            .collect()
    }

    #[tokio::test]
    async fn test_active_power_scenario() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let source = FixedSource::default().with("active_power", 6500.0);
        let evaluator = AlertEvaluator::new(&source, &log);

        let report = evaluator
            .run_cycle(
                &rules(&[("active_power", Some(0.0), Some(6000.0))]),
                ExecutionMode::Automatic,
                Utc::now(),
            )
            .await;

        assert_eq!(report.new_alerts.len(), 1);
        let event = &report.new_alerts[0];
        assert_eq!(
            event.reason,
            "active_power (6500.00) está por encima del umbral máximo (6000.00)"
        );
        assert_eq!(event.value, 6500.0);
        assert_eq!(event.threshold_description, "Min: 0.00, Max: 6000.00");

        let logged = log.load();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0], *event);
    }

    #[tokio::test]
    async fn test_partial_failure_continues() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let source = FixedSource::default()
            .failing("current_l1")
            .with("voltaje", 250.0);
        let evaluator = AlertEvaluator::new(&source, &log);

        let report = evaluator
            .run_cycle(
                &rules(&[
                    ("current_l1", Some(0.0), Some(50.0)),
                    ("voltaje", Some(200.0), Some(240.0)),
                    ("active_power", Some(0.0), Some(6000.0)),
                ]),
                ExecutionMode::Manual,
                Utc::now(),
            )
            .await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.failed_count(), 1);
        assert!(!report.is_total_failure());
        assert_eq!(report.new_alerts.len(), 1);
        assert_eq!(report.new_alerts[0].execution_mode, ExecutionMode::Manual);
        assert!(report
            .outcomes
            .iter()
            .any(|o| matches!(o, FieldOutcome::NoData { field } if field == "active_power")));
    }

    #[tokio::test]
    async fn test_in_range_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let source = FixedSource::default().with("voltaje", 240.0);
        let evaluator = AlertEvaluator::new(&source, &log);

        let report = evaluator
            .run_cycle(
                &rules(&[("voltaje", Some(200.0), Some(240.0))]),
                ExecutionMode::Automatic,
                Utc::now(),
            )
            .await;

        assert!(report.new_alerts.is_empty());
        assert!(log.load().is_empty());
        assert!(!dir.path().join(crate::store::ALERT_LOG_FILE).exists());
    }

    #[tokio::test]
    async fn test_total_failure() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let source = FixedSource::default().failing("voltaje");
        let evaluator = AlertEvaluator::new(&source, &log);

        let report = evaluator
            .run_cycle(
                &rules(&[("voltaje", Some(200.0), None)]),
                ExecutionMode::Automatic,
                Utc::now(),
            )
            .await;
        assert!(report.is_total_failure());

        let empty = evaluator
            .run_cycle(&ThresholdSet::new(), ExecutionMode::Automatic, Utc::now())
            .await;
        assert!(!empty.is_total_failure());
    }
}
