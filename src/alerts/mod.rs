//! Threshold alerting for power metrics
//!
//! Evaluates the latest value of each configured field against its
//! thresholds, keeps a bounded alert log and sends debounced digest emails
//! to opted-in users.

pub mod checker;
pub mod digest;
pub mod evaluator;
pub mod event;
pub mod notifier;
pub mod rules;

pub use checker::{AlertChecker, CheckRun};
pub use digest::{DigestDecision, DigestOutcome, DigestPolicy, DigestScheduler, DigestWindow};
pub use evaluator::{AlertEvaluator, CycleReport, FieldOutcome};
pub use event::{AlertEvent, ExecutionMode};
pub use notifier::{LogNotifier, Notifier, NotifierError, ResendConfig, ResendNotifier};
pub use rules::{Breach, ThresholdRule, ThresholdSet};
