//! Process settings from the environment

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{DigestPolicy, LogNotifier, Notifier, ResendConfig, ResendNotifier};
use crate::auth::{PasswordHasher, DEFAULT_BCRYPT_COST, DEFAULT_SESSION_TTL};
use crate::timeseries::{InfluxClient, InfluxConfig, QueryError};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding every flat file
    pub data_dir: PathBuf,
    pub influx: InfluxConfig,
    /// How far back a query looks for the latest point
    pub lookback: Duration,
    pub resend_api_url: String,
    /// Without a key, email is only logged
    pub resend_api_key: Option<String>,
    /// Sender address for digests and reset links
    pub resend_from: String,
    pub http_timeout: Duration,
    /// Public URL that reset links point at
    pub base_url: String,
    pub host: String,
    pub port: u16,
    /// In-process schedule for `serve`; unset means an external scheduler
    pub check_interval: Option<Duration>,
    /// Idle time after which a session expires
    pub session_ttl: Duration,
    pub bcrypt_cost: u32,
    /// Registration is limited to this domain when set
    pub allowed_email_domain: Option<String>,
    pub digest_policy: DigestPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            influx: InfluxConfig::default(),
            lookback: Duration::from_secs(120),
            resend_api_url: "https://api.resend.com/emails".to_string(),
            resend_api_key: None,
            resend_from: String::new(),
            http_timeout: Duration::from_secs(10),
            base_url: "http://localhost:8501".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8501,
            check_interval: None,
            session_ttl: DEFAULT_SESSION_TTL,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            allowed_email_domain: None,
            digest_policy: DigestPolicy::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unparseable values fall back to
    /// defaults with a warning
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str| {
            get(key).and_then(|raw| match raw.parse::<u64>() {
                Ok(v) => Some(Duration::from_secs(v)),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, "Ignoring invalid duration");
                    None
                }
            })
        };

        let http_timeout = secs("POWERWATCH_HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout);

        let influx = InfluxConfig {
            url: get("INFLUXDB_URL").unwrap_or(defaults.influx.url),
            token: get("INFLUXDB_TOKEN").unwrap_or(defaults.influx.token),
            org: get("INFLUXDB_ORG").unwrap_or(defaults.influx.org),
            bucket: get("POWERWATCH_ALERT_BUCKET").unwrap_or(defaults.influx.bucket),
            timeout: http_timeout,
        };

        let port = match get("POWERWATCH_PORT").map(|p| p.parse::<u16>()) {
            Some(Ok(port)) => port,
            Some(Err(_)) => {
                tracing::warn!("Ignoring invalid POWERWATCH_PORT");
                defaults.port
            }
            None => defaults.port,
        };

        let bcrypt_cost = get("POWERWATCH_BCRYPT_COST")
            .and_then(|c| c.parse().ok())
            .unwrap_or(defaults.bcrypt_cost);

        let digest_policy = match get("POWERWATCH_DIGEST_POLICY").map(|p| p.parse::<DigestPolicy>()) {
            Some(Ok(policy)) => policy,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Ignoring invalid POWERWATCH_DIGEST_POLICY");
                defaults.digest_policy
            }
            None => defaults.digest_policy,
        };

        Self {
            data_dir: get("POWERWATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            influx,
            lookback: secs("POWERWATCH_LOOKBACK_SECS").unwrap_or(defaults.lookback),
            resend_api_url: get("RESEND_API_URL").unwrap_or(defaults.resend_api_url),
            resend_api_key: get("RESEND_API_KEY"),
            resend_from: get("RESEND_FROM").unwrap_or(defaults.resend_from),
            http_timeout,
            base_url: get("POWERWATCH_BASE_URL").unwrap_or(defaults.base_url),
            host: get("POWERWATCH_HOST").unwrap_or(defaults.host),
            port,
            check_interval: secs("POWERWATCH_CHECK_INTERVAL_SECS").filter(|d| !d.is_zero()),
            session_ttl: secs("POWERWATCH_SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            bcrypt_cost,
            allowed_email_domain: get("POWERWATCH_ALLOWED_EMAIL_DOMAIN"),
            digest_policy,
        }
    }

    pub fn influx_client(&self) -> Result<InfluxClient, QueryError> {
        InfluxClient::new(self.influx.clone())
    }

    /// Resend when an API key and sender are set, otherwise log only
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        let Some(api_key) = self.resend_api_key.clone() else {
            tracing::warn!("RESEND_API_KEY not set, emails will only be logged");
            return Arc::new(LogNotifier);
        };

        let config = ResendConfig {
            api_url: self.resend_api_url.clone(),
            api_key,
            from: self.resend_from.clone(),
            timeout: self.http_timeout,
        };
        match ResendNotifier::new(config) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to log-only notifier");
                Arc::new(LogNotifier)
            }
        }
    }

    pub fn password_hasher(&self) -> PasswordHasher {
        PasswordHasher::new(self.bcrypt_cost)
    }
}
