//! Bounded alert log

use std::path::Path;

use chrono::{DateTime, Utc};

use super::{FlatFile, StoreError, ALERT_LOG_FILE};
use crate::alerts::{AlertEvent, ExecutionMode};

/// Maximum number of events kept; the oldest are evicted first
pub const ALERT_LOG_CAPACITY: usize = 100;

/// Append-only log of detected alerts, newest last
pub struct AlertLogStore {
    file: FlatFile<Vec<AlertEvent>>,
    capacity: usize,
}

impl AlertLogStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(ALERT_LOG_FILE)),
            capacity: ALERT_LOG_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// All retained events, oldest first
    pub fn load(&self) -> Vec<AlertEvent> {
        self.file.load()
    }

    /// Append one event and persist, evicting from the front past capacity
    pub fn append(&self, event: AlertEvent) -> Result<(), StoreError> {
        let capacity = self.capacity;
        self.file.update(|events| {
            events.push(event);
            if events.len() > capacity {
                let excess = events.len() - capacity;
                events.drain(..excess);
            }
        })
    }

    /// The `limit` most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<AlertEvent> {
        let mut events = self.load();
        events.reverse();
        events.truncate(limit);
        events
    }

    /// Automatic-mode events strictly newer than `since` (all of them when
    /// `since` is `None`), oldest first
    pub fn automatic_since(&self, since: Option<DateTime<Utc>>) -> Vec<AlertEvent> {
        self.load()
            .into_iter()
            .filter(|e| e.execution_mode == ExecutionMode::Automatic)
            .filter(|e| since.map_or(true, |t| e.timestamp > t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn event(n: usize, mode: ExecutionMode, at: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            timestamp: at,
            variable: format!("field_{}", n),
            value: n as f64,
            threshold_description: "Min: N/A, Max: 0.00".to_string(),
            execution_mode: mode,
            reason: String::new(),
        }
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let now = Utc::now();

        for n in 0..=ALERT_LOG_CAPACITY {
            log.append(event(n, ExecutionMode::Automatic, now)).unwrap();
        }

        let events = log.load();
        assert_eq!(events.len(), ALERT_LOG_CAPACITY);
        assert_eq!(events.first().unwrap().variable, "field_1");
        assert_eq!(
            events.last().unwrap().variable,
            format!("field_{}", ALERT_LOG_CAPACITY)
        );
    }

    #[test]
    fn test_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let now = Utc::now();
        for n in 0..5 {
            log.append(event(n, ExecutionMode::Automatic, now)).unwrap();
        }

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].variable, "field_4");
        assert_eq!(recent[1].variable, "field_3");
    }

    #[test]
    fn test_automatic_since_skips_manual_and_old() {
        let dir = TempDir::new().unwrap();
        let log = AlertLogStore::new(dir.path());
        let t0 = Utc::now();

        log.append(event(0, ExecutionMode::Automatic, t0 - Duration::minutes(5)))
            .unwrap();
        log.append(event(1, ExecutionMode::Manual, t0 + Duration::minutes(1)))
            .unwrap();
        log.append(event(2, ExecutionMode::Automatic, t0 + Duration::minutes(2)))
            .unwrap();

        let pending = log.automatic_since(Some(t0));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].variable, "field_2");
        assert_eq!(log.automatic_since(None).len(), 2);
    }

    #[test]
    fn test_corrupt_log_is_restarted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ALERT_LOG_FILE), "[{").unwrap();
        let log = AlertLogStore::new(dir.path());

        log.append(event(7, ExecutionMode::Manual, Utc::now())).unwrap();
        assert_eq!(log.load().len(), 1);
    }
}
