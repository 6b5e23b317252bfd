//! Flat-file stores
//!
//! Every piece of durable state lives in its own JSON or YAML file inside the
//! data directory. Loads never fail: a missing file yields the default value
//! and a corrupt file is logged and treated as empty. Saves go through a
//! temporary file in the same directory followed by a rename, so a crash
//! mid-write leaves the previous contents intact.

pub mod alert_log;
pub mod digest_state;
pub mod health;
pub mod site;
pub mod thresholds;
pub mod tokens;
pub mod users;

pub use alert_log::{AlertLogStore, ALERT_LOG_CAPACITY};
pub use digest_state::DigestStateStore;
pub use health::{CheckerHealth, HealthStore};
pub use site::{Credential, SiteConfig, SiteConfigStore};
pub use thresholds::ThresholdStore;
pub use tokens::{ResetToken, ResetTokenStore};
pub use users::{UserProfile, UserStore};

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// File names inside the data directory
pub const THRESHOLDS_FILE: &str = "umbral_config.json";
pub const ALERT_LOG_FILE: &str = "logs_alertas.json";
pub const DIGEST_STATE_FILE: &str = "last_digest_sent_state.json";
pub const USERS_FILE: &str = "usuarios.json";
pub const RESET_TOKENS_FILE: &str = "reset_tokens.json";
pub const SITE_CONFIG_FILE: &str = "config.yaml";
pub const HEALTH_FILE: &str = "checker_health.json";

/// Encoding used by a flat file
pub trait Format {
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String>;
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String>;
}

/// Pretty-printed JSON
pub struct Json;

impl Format for Json {
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec_pretty(value).map_err(|e| e.to_string())
    }
}

/// YAML
pub struct Yaml;

impl Format for Yaml {
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
        serde_yaml::from_slice(bytes).map_err(|e| e.to_string())
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| e.to_string())
    }
}

/// A single value persisted as a whole file
pub struct FlatFile<T, F: Format = Json> {
    path: PathBuf,
    _marker: PhantomData<fn() -> (T, F)>,
}

impl<T, F> FlatFile<T, F>
where
    T: Serialize + DeserializeOwned + Default,
    F: Format,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, falling back to `T::default()` when it is missing or
    /// cannot be decoded
    pub fn load(&self) -> T {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!(path = %self.path.display(), "File not found, using default");
                T::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Could not read file, using default"
                );
                T::default()
            }
        }
    }

    /// Read the file, reporting decode failures to the caller
    pub fn try_load(&self) -> Result<Option<T>, StoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(StoreError::Decode {
                path: self.path.clone(),
                message: "file is empty".to_string(),
            });
        }

        F::decode(&bytes).map(Some).map_err(|message| StoreError::Decode {
            path: self.path.clone(),
            message,
        })
    }

    /// Replace the file contents atomically
    pub fn save(&self, value: &T) -> Result<(), StoreError> {
        let bytes = F::encode(value).map_err(StoreError::Encode)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        Ok(())
    }

    /// Load, mutate and save in one step, returning the closure's result
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let mut value = self.load();
        let result = f(&mut value);
        self.save(&value)?;
        Ok(result)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Encode(String),
}

/// Timestamp serialization helper
///
/// Writes RFC 3339. Reads RFC 3339 as well as naive ISO-8601 timestamps,
/// which are interpreted in the local time zone.
pub(crate) mod iso_time {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}
