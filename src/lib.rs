//! PowerWatch: threshold alerting for PowerLogic power metrics
//!
//! Reads the latest value of each configured field from InfluxDB, compares
//! it against per-field thresholds and keeps a bounded alert log. Automatic
//! runs batch new alerts into a debounced digest email for every opted-in
//! user. An HTTP API covers login, password reset, profiles, threshold and
//! notification settings, and user administration.
//!
//! All state lives in flat files inside one data directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `umbral_config.json` | field -> `{min, max}` |
//! | `logs_alertas.json` | last 100 alert events |
//! | `last_digest_sent_state.json` | time of the last digest |
//! | `usuarios.json` | notification preferences |
//! | `reset_tokens.json` | pending password reset tokens |
//! | `config.yaml` | credentials and global notification settings |
//! | `checker_health.json` | outcome of the last check |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use powerwatch::alerts::{AlertChecker, ExecutionMode, LogNotifier};
//! use powerwatch::timeseries::{InfluxClient, InfluxConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(InfluxClient::new(InfluxConfig::default())?);
//! let checker = AlertChecker::new("/var/lib/powerwatch", source, Arc::new(LogNotifier));
//!
//! let run = checker.run_once(ExecutionMode::Manual).await;
//! println!("{} new alerts", run.report.new_alerts.len());
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod export;
pub mod store;
pub mod timeseries;

// Re-export commonly used types
pub use alerts::{AlertChecker, AlertEvent, ExecutionMode, ThresholdRule, ThresholdSet};
pub use config::Settings;
pub use store::StoreError;
