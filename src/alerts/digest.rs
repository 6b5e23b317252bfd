//! Debounced alert digests
//!
//! At most one digest goes out per configured interval. The gate is wall
//! clock based: a cycle with new alerts sends only when `now` has reached
//! `last_sent + interval`.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};

use super::event::{AlertEvent, ExecutionMode};
use super::notifier::Notifier;
use crate::store::{AlertLogStore, DigestStateStore, UserStore};

/// Which events a due digest reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestPolicy {
    /// Every automatic alert logged since the previous digest
    #[default]
    Accumulate,
    /// Only the alerts of the cycle that crossed the interval
    CurrentCycle,
}

impl FromStr for DigestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accumulate" => Ok(DigestPolicy::Accumulate),
            "current-cycle" | "current_cycle" => Ok(DigestPolicy::CurrentCycle),
            other => Err(format!("unknown digest policy: {}", other)),
        }
    }
}

/// Whether a digest may go out now
#[derive(Debug, Clone, PartialEq)]
pub enum DigestDecision {
    NoAlerts,
    /// Too soon after the last digest
    Debounced { next_allowed: DateTime<Utc> },
    /// `since` is the previous send time, `None` on the first digest
    Due { since: Option<DateTime<Utc>> },
}

/// Upper bound keeping interval arithmetic in range (about a century)
const MAX_INTERVAL_MINUTES: u64 = 60 * 24 * 365 * 100;

/// The interval gate on its own
#[derive(Debug, Clone, Copy)]
pub struct DigestWindow {
    interval_minutes: u64,
}

impl DigestWindow {
    pub fn new(interval_minutes: u64) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1),
        }
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes
    }

    /// Earliest time the next digest may be sent; `None` if never sent
    pub fn next_allowed(&self, last_sent: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        let interval = Duration::minutes(self.interval_minutes.min(MAX_INTERVAL_MINUTES) as i64);
        last_sent.map(|t| t.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// Due when this cycle found alerts and `now` has reached
    /// `last_sent + interval`
    pub fn decide(
        &self,
        last_sent: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        new_alerts: usize,
    ) -> DigestDecision {
        if new_alerts == 0 {
            return DigestDecision::NoAlerts;
        }
        match self.next_allowed(last_sent) {
            Some(next_allowed) if now < next_allowed => DigestDecision::Debounced { next_allowed },
            _ => DigestDecision::Due { since: last_sent },
        }
    }
}

/// What the scheduler did this cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DigestOutcome {
    /// Operator-triggered cycles never send
    ManualRun,
    NotificationsDisabled,
    NoRecipients,
    NoAlerts,
    Debounced { next_allowed: DateTime<Utc> },
    /// `failures` counts recipients whose delivery failed
    Sent { events: usize, recipients: usize, failures: usize },
}

/// Decides on and sends the digest for one evaluator cycle
pub struct DigestScheduler<'a> {
    window: DigestWindow,
    policy: DigestPolicy,
    users: &'a UserStore,
    state: &'a DigestStateStore,
    log: &'a AlertLogStore,
    notifier: &'a dyn Notifier,
}

impl<'a> DigestScheduler<'a> {
    pub fn new(
        window: DigestWindow,
        users: &'a UserStore,
        state: &'a DigestStateStore,
        log: &'a AlertLogStore,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            window,
            policy: DigestPolicy::default(),
            users,
            state,
            log,
            notifier,
        }
    }

    pub fn with_policy(mut self, policy: DigestPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run once, after every field of the cycle has been evaluated.
    ///
    /// Send failures for one recipient do not stop the others, and the send
    /// time is recorded once every recipient has been attempted, whether or
    /// not any delivery succeeded.
    pub async fn run(
        &self,
        mode: ExecutionMode,
        notifications_enabled: bool,
        cycle_alerts: &[AlertEvent],
        now: DateTime<Utc>,
    ) -> DigestOutcome {
        if mode == ExecutionMode::Manual {
            tracing::info!(
                alerts = cycle_alerts.len(),
                "Manual run, digest emails are not sent"
            );
            return DigestOutcome::ManualRun;
        }

        if !notifications_enabled {
            tracing::info!("Global notifications disabled, no digest sent");
            return DigestOutcome::NotificationsDisabled;
        }

        let recipients = self.users.recipients();
        if recipients.is_empty() {
            tracing::info!("No opted-in recipients, no digest sent");
            return DigestOutcome::NoRecipients;
        }

        let last_sent = self.state.last_sent();
        let since = match self.window.decide(last_sent, now, cycle_alerts.len()) {
            DigestDecision::NoAlerts => {
                tracing::info!("No alerts detected this cycle, no digest sent");
                return DigestOutcome::NoAlerts;
            }
            DigestDecision::Debounced { next_allowed } => {
                tracing::info!(
                    next_allowed = %next_allowed.to_rfc3339(),
                    "Alerts detected, but the digest interval has not elapsed"
                );
                return DigestOutcome::Debounced { next_allowed };
            }
            DigestDecision::Due { since } => since,
        };

        let events = self.collect_events(cycle_alerts, since);
        let subject = digest_subject(events.len());
        let html = render_digest(&events, since, now, self.window.interval_minutes());

        tracing::info!(
            interval_minutes = self.window.interval_minutes(),
            events = events.len(),
            recipients = recipients.len(),
            "Sending alert digest"
        );

        let mut failures = 0;
        for to in &recipients {
            if let Err(e) = self.notifier.send(to, &subject, &html).await {
                failures += 1;
                tracing::error!(to = %to, error = %e, "Failed to send digest");
            }
        }

        if let Err(e) = self.state.record_sent(now) {
            tracing::error!(error = %e, "Failed to record digest send time");
        }

        DigestOutcome::Sent {
            events: events.len(),
            recipients: recipients.len(),
            failures,
        }
    }

    fn collect_events(
        &self,
        cycle_alerts: &[AlertEvent],
        since: Option<DateTime<Utc>>,
    ) -> Vec<AlertEvent> {
        match self.policy {
            DigestPolicy::CurrentCycle => cycle_alerts.to_vec(),
            DigestPolicy::Accumulate => {
                let mut events = self.log.automatic_since(since);
                // the log write may have failed for some of this cycle's events
                for alert in cycle_alerts {
                    if !events.contains(alert) {
                        events.push(alert.clone());
                    }
                }
                events
            }
        }
    }
}

/// Subject line carrying the event count
pub fn digest_subject(count: usize) -> String {
    format!("⚠️ Resumen de Alertas PowerLogic ({} nuevas)", count)
}

fn format_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// HTML body listing every event
pub fn render_digest(
    events: &[AlertEvent],
    since: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_minutes: u64,
) -> String {
    let since = since
        .map(format_time)
        .unwrap_or_else(|| "el inicio del registro".to_string());

    let mut html = String::from("<h2>Resumen de Alertas de PowerLogic</h2>");
    let _ = write!(
        html,
        "<p>Se detectaron las siguientes condiciones de alerta entre {} y {}:</p><ul>",
        since,
        format_time(now)
    );

    for event in events {
        let _ = write!(
            html,
            "<li><strong>Fecha:</strong> {}<br>\
             <strong>Variable:</strong> {}<br>\
             <strong>Valor actual:</strong> {:.2}<br>\
             <strong>Umbrales configurados:</strong> {}<br>\
             <strong>Motivo:</strong> {}</li>",
            format_time(event.timestamp),
            escape_html(&event.variable),
            event.value,
            escape_html(&event.threshold_description),
            escape_html(&event.reason),
        );
    }

    let _ = write!(
        html,
        "</ul><p><em>Este resumen se genera cada {} minutos.</em></p>",
        interval_minutes
    );
    html
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerts::notifier::NotifierError;
    use crate::store::UserProfile;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Records every send; addresses listed in `failing` error out
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String, String)>>,
        pub failing: Vec<String>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifierError> {
            if self.failing.iter().any(|f| f == to) {
                return Err(NotifierError::Transport("smtp down".to_string()));
            }
            self.sent
                .lock()
                .push((to.to_string(), subject.to_string(), html_body.to_string()));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-15T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn alert(field: &str, at: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            timestamp: at,
            variable: field.to_string(),
            value: 6500.0,
            threshold_description: "Min: 0.00, Max: 6000.00".to_string(),
            execution_mode: ExecutionMode::Automatic,
            reason: format!("{} (6500.00) está por encima del umbral máximo (6000.00)", field),
        }
    }

    struct Fixture {
        _dir: TempDir,
        users: UserStore,
        state: DigestStateStore,
        log: AlertLogStore,
    }

    fn fixture(recipients: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let users = UserStore::new(dir.path());
        for email in recipients {
            users.upsert(UserProfile::new("u", *email, true)).unwrap();
        }
        Fixture {
            users,
            state: DigestStateStore::new(dir.path()),
            log: AlertLogStore::new(dir.path()),
            _dir: dir,
        }
    }

    #[test]
    fn test_window_decisions() {
        let window = DigestWindow::new(60);
        let t0 = t0();

        assert_eq!(window.decide(Some(t0), t0 + Duration::minutes(90), 0), DigestDecision::NoAlerts);
        assert_eq!(
            window.decide(Some(t0), t0 + Duration::minutes(30), 2),
            DigestDecision::Debounced {
                next_allowed: t0 + Duration::minutes(60)
            }
        );
        assert_eq!(
            window.decide(Some(t0), t0 + Duration::minutes(60), 1),
            DigestDecision::Due { since: Some(t0) }
        );
        assert_eq!(window.decide(None, t0, 1), DigestDecision::Due { since: None });
    }

    #[tokio::test]
    async fn test_debounce_then_send() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let scheduler = DigestScheduler::new(DigestWindow::new(60), &fx.users, &fx.state, &fx.log, &notifier);
        let t0 = t0();
        fx.state.record_sent(t0).unwrap();

        let at_30 = t0 + Duration::minutes(30);
        let outcome = scheduler
            .run(ExecutionMode::Automatic, true, &[alert("active_power", at_30)], at_30)
            .await;
        assert!(matches!(outcome, DigestOutcome::Debounced { .. }));
        assert!(notifier.sent.lock().is_empty());
        assert_eq!(fx.state.last_sent(), Some(t0));

        let at_61 = t0 + Duration::minutes(61);
        let outcome = scheduler
            .run(ExecutionMode::Automatic, true, &[alert("active_power", at_61)], at_61)
            .await;
        assert_eq!(
            outcome,
            DigestOutcome::Sent {
                events: 1,
                recipients: 1,
                failures: 0
            }
        );
        assert_eq!(notifier.sent.lock().len(), 1);
        assert_eq!(fx.state.last_sent(), Some(at_61));
    }

    #[tokio::test]
    async fn test_manual_never_sends() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let scheduler = DigestScheduler::new(DigestWindow::new(1), &fx.users, &fx.state, &fx.log, &notifier);

        let outcome = scheduler
            .run(ExecutionMode::Manual, true, &[alert("voltaje", t0())], t0())
            .await;
        assert_eq!(outcome, DigestOutcome::ManualRun);
        assert!(notifier.sent.lock().is_empty());
        assert!(fx.state.last_sent().is_none());
    }

    #[tokio::test]
    async fn test_disabled_and_no_recipients() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let scheduler = DigestScheduler::new(DigestWindow::new(1), &fx.users, &fx.state, &fx.log, &notifier);
        let alerts = [alert("voltaje", t0())];

        assert_eq!(
            scheduler.run(ExecutionMode::Automatic, false, &alerts, t0()).await,
            DigestOutcome::NotificationsDisabled
        );

        let empty = fixture(&[]);
        let scheduler = DigestScheduler::new(DigestWindow::new(1), &empty.users, &empty.state, &empty.log, &notifier);
        assert_eq!(
            scheduler.run(ExecutionMode::Automatic, true, &alerts, t0()).await,
            DigestOutcome::NoRecipients
        );
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_alerts_leaves_state() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let scheduler = DigestScheduler::new(DigestWindow::new(1), &fx.users, &fx.state, &fx.log, &notifier);

        assert_eq!(
            scheduler.run(ExecutionMode::Automatic, true, &[], t0()).await,
            DigestOutcome::NoAlerts
        );
        assert!(fx.state.last_sent().is_none());
    }

    #[tokio::test]
    async fn test_failed_recipient_still_consumes_window() {
        let fx = fixture(&["down@x.org", "ana@x.org"]);
        let notifier = RecordingNotifier {
            failing: vec!["down@x.org".to_string()],
            ..Default::default()
        };
        let scheduler = DigestScheduler::new(DigestWindow::new(60), &fx.users, &fx.state, &fx.log, &notifier);

        let outcome = scheduler
            .run(ExecutionMode::Automatic, true, &[alert("voltaje", t0())], t0())
            .await;
        assert_eq!(
            outcome,
            DigestOutcome::Sent {
                events: 1,
                recipients: 2,
                failures: 1
            }
        );
        assert_eq!(notifier.sent.lock()[0].0, "ana@x.org");
        assert_eq!(fx.state.last_sent(), Some(t0()));
    }

    #[tokio::test]
    async fn test_accumulate_includes_debounced_cycles() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let t0 = t0();
        fx.state.record_sent(t0).unwrap();

        let earlier = alert("voltaje", t0 + Duration::minutes(20));
        let current = alert("active_power", t0 + Duration::minutes(61));
        let manual = AlertEvent {
            execution_mode: ExecutionMode::Manual,
            ..alert("current_l1", t0 + Duration::minutes(25))
        };
        fx.log.append(alert("stale", t0 - Duration::minutes(5))).unwrap();
        fx.log.append(earlier.clone()).unwrap();
        fx.log.append(manual).unwrap();
        fx.log.append(current.clone()).unwrap();

        let scheduler = DigestScheduler::new(DigestWindow::new(60), &fx.users, &fx.state, &fx.log, &notifier);
        let outcome = scheduler
            .run(ExecutionMode::Automatic, true, &[current.clone()], current.timestamp)
            .await;
        assert!(matches!(outcome, DigestOutcome::Sent { events: 2, .. }));

        let sent = notifier.sent.lock();
        let (_, subject, html) = &sent[0];
        assert!(subject.contains("(2 nuevas)"));
        assert!(html.contains("voltaje"));
        assert!(html.contains("active_power"));
        assert!(!html.contains("current_l1"));
        assert!(!html.contains("stale"));
    }

    #[tokio::test]
    async fn test_current_cycle_policy() {
        let fx = fixture(&["ana@x.org"]);
        let notifier = RecordingNotifier::default();
        let earlier = alert("voltaje", t0());
        fx.log.append(earlier).unwrap();

        let current = alert("active_power", t0() + Duration::minutes(1));
        let scheduler = DigestScheduler::new(DigestWindow::new(60), &fx.users, &fx.state, &fx.log, &notifier)
            .with_policy(DigestPolicy::CurrentCycle);
        let outcome = scheduler
            .run(ExecutionMode::Automatic, true, &[current.clone()], current.timestamp)
            .await;
        assert!(matches!(outcome, DigestOutcome::Sent { events: 1, .. }));
        assert!(!notifier.sent.lock()[0].2.contains("voltaje"));
    }

    #[test]
    fn test_render_escapes() {
        let mut event = alert("a<b>", t0());
        event.reason = "x & y".to_string();
        let html = render_digest(&[event], None, t0(), 1440);
        assert!(html.contains("a&lt;b&gt;"));
        assert!(html.contains("x &amp; y"));
        assert!(html.contains("el inicio del registro"));
        assert!(html.contains("cada 1440 minutos"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("accumulate".parse::<DigestPolicy>().unwrap(), DigestPolicy::Accumulate);
        assert_eq!("Current-Cycle".parse::<DigestPolicy>().unwrap(), DigestPolicy::CurrentCycle);
        assert!("weekly".parse::<DigestPolicy>().is_err());
    }
}
