//! Last digest send time

use std::path::Path;

use chrono::{DateTime, Utc};

use super::{iso_time, FlatFile, StoreError, DIGEST_STATE_FILE};

/// Persists a single ISO-8601 timestamp string; absent means never sent
pub struct DigestStateStore {
    file: FlatFile<Option<String>>,
}

impl DigestStateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(DIGEST_STATE_FILE)),
        }
    }

    /// `None` when never sent or when the stored value does not parse
    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        let raw = self.file.load()?;
        let parsed = iso_time::parse(&raw);
        if parsed.is_none() {
            tracing::warn!(
                path = %self.file.path().display(),
                value = %raw,
                "Unreadable digest timestamp, treating digest as never sent"
            );
        }
        parsed
    }

    /// Overwrite the send time with `at`
    pub fn record_sent(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.file.save(&Some(at.to_rfc3339()))
    }
}
