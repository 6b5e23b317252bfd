//! Alert checker: one full invocation of evaluator, digest and health
//! bookkeeping, plus an optional in-process schedule

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;

use super::digest::{DigestOutcome, DigestPolicy, DigestScheduler, DigestWindow};
use super::evaluator::{AlertEvaluator, CycleReport, DEFAULT_LOOKBACK};
use super::event::ExecutionMode;
use super::notifier::Notifier;
use crate::store::{
    AlertLogStore, CheckerHealth, DigestStateStore, HealthStore, SiteConfigStore, ThresholdStore,
    UserStore,
};
use crate::timeseries::TimeSeriesSource;

/// Outcome of one checker invocation
#[derive(Debug, Clone, Serialize)]
pub struct CheckRun {
    pub report: CycleReport,
    /// What the digest step decided, including why it did not send
    pub digest: DigestOutcome,
}

impl CheckRun {
    pub fn is_total_failure(&self) -> bool {
        self.report.is_total_failure()
    }
}

/// Runs evaluator cycles against the stores in one data directory.
///
/// Every store is reloaded on each cycle. Cycles are serialised through an
/// internal lock so a scheduled run and a manual run never interleave their
/// file writes within this process.
pub struct AlertChecker {
    data_dir: PathBuf,
    source: Arc<dyn TimeSeriesSource>,
    notifier: Arc<dyn Notifier>,
    lookback: Duration,
    policy: DigestPolicy,
    run_lock: Mutex<()>,
    shutdown_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
}

impl AlertChecker {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        source: Arc<dyn TimeSeriesSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            source,
            notifier,
            lookback: DEFAULT_LOOKBACK,
            policy: DigestPolicy::default(),
            run_lock: Mutex::new(()),
            shutdown_tx: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_policy(mut self, policy: DigestPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Last recorded health
    pub fn health(&self) -> CheckerHealth {
        HealthStore::new(&self.data_dir).load()
    }

    /// Run one cycle now
    pub async fn run_once(&self, mode: ExecutionMode) -> CheckRun {
        let _guard = self.run_lock.lock().await;
        self.run_at(mode, Utc::now()).await
    }

    async fn run_at(&self, mode: ExecutionMode, now: DateTime<Utc>) -> CheckRun {
        let dir = self.data_dir.as_path();
        let site = SiteConfigStore::new(dir).load();
        let thresholds = ThresholdStore::new(dir).load();
        let log = AlertLogStore::new(dir);
        let users = UserStore::new(dir);
        let state = DigestStateStore::new(dir);

        if thresholds.is_empty() {
            tracing::warn!("No thresholds configured, nothing to evaluate");
        }

        tracing::info!(mode = %mode, fields = thresholds.len(), "Starting alert check");

        let report = AlertEvaluator::new(self.source.as_ref(), &log)
            .with_lookback(self.lookback)
            .run_cycle(&thresholds, mode, now)
            .await;

        let digest = DigestScheduler::new(
            DigestWindow::new(site.digest_interval_minutes()),
            &users,
            &state,
            &log,
            self.notifier.as_ref(),
        )
        .with_policy(self.policy)
        .run(mode, site.notifications_enabled, &report.new_alerts, now)
        .await;

        self.record_health(&report, now);

        tracing::info!(
            mode = %mode,
            alerts = report.new_alerts.len(),
            failed = report.failed_count(),
            "Alert check finished"
        );

        CheckRun { report, digest }
    }

    fn record_health(&self, report: &CycleReport, now: DateTime<Utc>) {
        let store = HealthStore::new(&self.data_dir);
        let mut health = store.load();

        health.last_run = Some(now);
        health.last_mode = Some(report.mode);
        health.fields_checked = report.outcomes.len();
        health.fields_failed = report.failed_count();
        health.alerts_detected = report.new_alerts.len();

        if report.is_total_failure() {
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            health.last_error = Some(format!(
                "all {} time-series queries failed",
                report.outcomes.len()
            ));
        } else {
            health.last_success = Some(now);
            health.consecutive_failures = 0;
            health.last_error = None;
        }

        if let Err(e) = store.save(&health) {
            tracing::error!(error = %e, "Failed to record checker health");
        }
    }

    /// Start automatic cycles every `check_interval`
    pub fn start(self: Arc<Self>, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!("Alert checker started with interval {:?}", check_interval);
            let mut ticker = interval(check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let run = self.run_once(ExecutionMode::Automatic).await;
                        if run.is_total_failure() {
                            tracing::error!("Scheduled alert check failed for every field");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Alert checker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the scheduled loop
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }
}
