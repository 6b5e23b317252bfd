//! Password reset tokens

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{iso_time, FlatFile, StoreError, RESET_TOKENS_FILE};

/// Stored half of a reset token, keyed by the token value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetTokenRecord {
    pub username: String,
    pub email: String,
    #[serde(with = "iso_time")]
    pub expiry: DateTime<Utc>,
}

/// A reset token together with its record
#[derive(Debug, Clone, PartialEq)]
pub struct ResetToken {
    pub token: String,
    pub username: String,
    pub email: String,
    pub expiry: DateTime<Utc>,
}

impl ResetTokenRecord {
    fn to_token(&self, token: &str) -> ResetToken {
        ResetToken {
            token: token.to_string(),
            username: self.username.clone(),
            email: self.email.clone(),
            expiry: self.expiry,
        }
    }
}

impl ResetToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Serializes every read-modify-write of the token file in this process
static TOKENS_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// token -> {username, email, expiry}
///
/// Entries are decoded one by one so a single malformed record does not take
/// the others down with it. Expired entries are swept on every access.
pub struct ResetTokenStore {
    file: FlatFile<BTreeMap<String, serde_json::Value>>,
}

impl ResetTokenStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(RESET_TOKENS_FILE)),
        }
    }

    fn decode_all(&self) -> BTreeMap<String, ResetTokenRecord> {
        self.file
            .load()
            .into_iter()
            .filter_map(|(token, raw)| match serde_json::from_value(raw) {
                Ok(record) => Some((token, record)),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping malformed reset token entry");
                    None
                }
            })
            .collect()
    }

    fn write_all(&self, records: &BTreeMap<String, ResetTokenRecord>) -> Result<(), StoreError> {
        let raw = records
            .iter()
            .map(|(token, record)| {
                serde_json::to_value(record)
                    .map(|v| (token.clone(), v))
                    .map_err(|e| StoreError::Encode(e.to_string()))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        self.file.save(&raw)
    }

    /// Load unexpired tokens, persisting the sweep when anything was dropped
    pub fn load_valid(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, ResetTokenRecord>, StoreError> {
        let _guard = TOKENS_LOCK.lock();
        self.sweep(now)
    }

    fn sweep(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, ResetTokenRecord>, StoreError> {
        let stored = self.file.load();
        let mut records = self.decode_all();
        records.retain(|_, r| r.expiry > now);

        if records.len() != stored.len() {
            tracing::debug!(
                removed = stored.len() - records.len(),
                "Purged expired reset tokens"
            );
            self.write_all(&records)?;
        }
        Ok(records)
    }

    pub fn insert(&self, token: &ResetToken, now: DateTime<Utc>) -> Result<(), StoreError> {
        let _guard = TOKENS_LOCK.lock();
        let mut records = self.sweep(now)?;
        records.insert(
            token.token.clone(),
            ResetTokenRecord {
                username: token.username.clone(),
                email: token.email.clone(),
                expiry: token.expiry,
            },
        );
        self.write_all(&records)
    }

    /// Remove and return a token that is present and not expired at `now`.
    ///
    /// Lookup and removal happen under one lock, so of two concurrent callers
    /// holding the same token at most one gets it back.
    pub fn take_valid(&self, token: &str, now: DateTime<Utc>) -> Result<Option<ResetToken>, StoreError> {
        let _guard = TOKENS_LOCK.lock();
        let mut records = self.sweep(now)?;
        let Some(record) = records.remove(token) else {
            return Ok(None);
        };
        self.write_all(&records)?;
        Ok(Some(record.to_token(token)))
    }

    /// Drop every token issued to `username`
    pub fn remove_for_user(&self, username: &str) -> Result<usize, StoreError> {
        let _guard = TOKENS_LOCK.lock();
        let mut records = self.decode_all();
        let before = records.len();
        records.retain(|_, r| r.username != username);
        let removed = before - records.len();
        if removed > 0 {
            self.write_all(&records)?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.file.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
