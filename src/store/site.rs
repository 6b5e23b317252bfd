//! Site configuration (`config.yaml`): global notification settings and
//! login credentials

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{FlatFile, StoreError, Yaml, SITE_CONFIG_FILE};

/// Digest interval used when the file does not set one
pub const DEFAULT_DIGEST_INTERVAL_MINUTES: u64 = 1440;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub credentials: Credentials,
    /// Global switch; when off no digest is sent to anyone
    #[serde(rename = "notificaciones_generales", default)]
    pub notifications_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_digest_interval_minutes: Option<u64>,
    /// Keys this crate does not interpret (e.g. `cookie`), kept on save
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl SiteConfig {
    /// Configured digest interval, defaulting missing or zero values
    pub fn digest_interval_minutes(&self) -> u64 {
        self.alert_digest_interval_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_DIGEST_INTERVAL_MINUTES)
    }

    pub fn credential(&self, username: &str) -> Option<&Credential> {
        self.credentials.usernames.get(username)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub usernames: BTreeMap<String, Credential>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Login record for one username
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// bcrypt hash
    #[serde(default)]
    pub password: String,
    /// `admin`, or null for regular users
    #[serde(default)]
    pub roles: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Credential {
    pub fn is_admin(&self) -> bool {
        self.roles.as_deref() == Some("admin")
    }

    pub fn display_name(&self, username: &str) -> String {
        let full = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let full = full.trim();
        if full.is_empty() {
            username.to_string()
        } else {
            full.to_string()
        }
    }
}

pub struct SiteConfigStore {
    file: FlatFile<SiteConfig, Yaml>,
}

impl SiteConfigStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            file: FlatFile::new(data_dir.join(SITE_CONFIG_FILE)),
        }
    }

    /// Best-effort read used by the checker; defaults on any problem
    pub fn load(&self) -> SiteConfig {
        self.file.load()
    }

    /// Read-modify-write. Unlike `load`, a corrupt file is reported instead
    /// of being replaced with defaults, so credentials are never wiped.
    pub fn update<R>(&self, f: impl FnOnce(&mut SiteConfig) -> R) -> Result<R, StoreError> {
        let mut config = self.file.try_load()?.unwrap_or_default();
        let result = f(&mut config);
        self.file.save(&config)?;
        Ok(result)
    }
}
