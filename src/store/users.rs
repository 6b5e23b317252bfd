//! Notification preferences per user

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{FlatFile, StoreError, USERS_FILE};

/// A user's contact and notification record, keyed by login email
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "nombre", default)]
    pub name: String,
    #[serde(default)]
    pub login_email: String,
    /// Where alert digests go; may differ from the login email
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_email: Option<String>,
    #[serde(rename = "recibir_notificaciones", default)]
    pub notifications_enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, login_email: impl Into<String>, notify: bool) -> Self {
        let login_email = login_email.into();
        Self {
            name: name.into(),
            alert_email: Some(login_email.clone()),
            login_email,
            notifications_enabled: notify,
            extra: BTreeMap::new(),
        }
    }

    /// Address for alert digests, if this user opted in and has one
    pub fn recipient(&self) -> Option<&str> {
        if !self.notifications_enabled {
            return None;
        }
        self.alert_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// `usuarios.json`: a list of user records
///
/// Records are decoded one by one. A record that does not decode is skipped
/// on read and left untouched on write, so one bad entry never hides the
/// other users.
pub struct UserStore {
    file: FlatFile<Vec<serde_json::Value>>,
}

const KNOWN_FIELDS: [&str; 4] = ["nombre", "login_email", "alert_email", "recibir_notificaciones"];

fn login_email_of(raw: &serde_json::Value) -> Option<&str> {
    raw.get("login_email").and_then(serde_json::Value::as_str)
}

impl UserStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(USERS_FILE)),
        }
    }

    pub fn load(&self) -> Vec<UserProfile> {
        self.file
            .load()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<UserProfile>(raw) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed user record");
                    None
                }
            })
            .collect()
    }

    /// Alert emails of every opted-in user, without duplicates
    pub fn recipients(&self) -> Vec<String> {
        let mut emails: Vec<String> = Vec::new();
        for user in self.load() {
            if let Some(email) = user.recipient() {
                if !emails.iter().any(|e| e.eq_ignore_ascii_case(email)) {
                    emails.push(email.to_string());
                }
            }
        }
        emails
    }

    pub fn find(&self, login_email: &str) -> Option<UserProfile> {
        self.load()
            .into_iter()
            .find(|u| u.login_email.eq_ignore_ascii_case(login_email))
    }

    /// Replace the record with the same login email, or append a new one.
    ///
    /// Fields this crate does not know about are carried over from the
    /// replaced record.
    pub fn upsert(&self, profile: UserProfile) -> Result<(), StoreError> {
        let mut encoded =
            serde_json::to_value(&profile).map_err(|e| StoreError::Encode(e.to_string()))?;

        self.file.update(|users| {
            let existing = users.iter_mut().find(|raw| {
                login_email_of(raw).is_some_and(|e| e.eq_ignore_ascii_case(&profile.login_email))
            });
            match existing {
                Some(raw) => {
                    if let (Some(old), Some(new)) = (raw.as_object(), encoded.as_object_mut()) {
                        for (key, value) in old {
                            if !KNOWN_FIELDS.contains(&key.as_str()) {
                                new.entry(key.clone()).or_insert_with(|| value.clone());
                            }
                        }
                    }
                    *raw = encoded;
                }
                None => users.push(encoded),
            }
        })
    }

    /// Remove every record for `login_email`, returning how many were dropped
    pub fn remove(&self, login_email: &str) -> Result<usize, StoreError> {
        self.file.update(|users| {
            let before = users.len();
            users.retain(|raw| {
                !login_email_of(raw).is_some_and(|e| e.eq_ignore_ascii_case(login_email))
            });
            before - users.len()
        })
    }
}
