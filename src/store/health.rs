//! Checker health record, so a chronically failing evaluator is visible
//! without reading process logs

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FlatFile, StoreError, HEALTH_FILE};
use crate::alerts::ExecutionMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckerHealth {
    /// Start of the most recent cycle
    pub last_run: Option<DateTime<Utc>>,
    /// Last cycle that was not a total failure
    pub last_success: Option<DateTime<Utc>>,
    pub last_mode: Option<ExecutionMode>,
    /// Fields with a rule in the last cycle
    pub fields_checked: usize,
    /// Fields whose query failed in the last cycle
    pub fields_failed: usize,
    /// Alerts raised by the last cycle
    pub alerts_detected: usize,
    /// Total failures in a row; reset by any cycle that is not one
    pub consecutive_failures: u32,
    /// Set by a total failure, cleared by the next success
    pub last_error: Option<String>,
}

pub struct HealthStore {
    file: FlatFile<CheckerHealth>,
}

impl HealthStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(HEALTH_FILE)),
        }
    }

    pub fn load(&self) -> CheckerHealth {
        self.file.load()
    }

    pub fn save(&self, health: &CheckerHealth) -> Result<(), StoreError> {
        self.file.save(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_never_run() {
        let dir = TempDir::new().unwrap();
        let health = HealthStore::new(dir.path()).load();
        assert!(health.last_run.is_none());
        assert_eq!(health.consecutive_failures, 0);
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = HealthStore::new(dir.path());
        let health = CheckerHealth {
            last_run: Some(Utc::now()),
            last_mode: Some(ExecutionMode::Automatic),
            fields_checked: 3,
            fields_failed: 3,
            consecutive_failures: 4,
            last_error: Some("all 3 time-series queries failed".to_string()),
            ..Default::default()
        };

        store.save(&health).unwrap();
        assert_eq!(store.load(), health);
    }
}
