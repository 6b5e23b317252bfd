//! Bearer sessions and the per-request auth context

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use moka::sync::Cache;
use rand::RngCore;
use serde::Serialize;

use crate::api::{ApiError, AppState};
use crate::store::{Credential, SiteConfigStore};

/// Idle time after which a session is dropped
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

const MAX_SESSIONS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Immutable view of the signed-in user, rebuilt from the credential store
/// on every request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
}

impl SessionSnapshot {
    pub fn from_credential(username: &str, credential: &Credential) -> Self {
        Self {
            username: username.to_string(),
            name: credential.display_name(username),
            email: credential.email.clone(),
            role: if credential.is_admin() {
                Role::Admin
            } else {
                Role::User
            },
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Look up `username` in `config.yaml`; `None` if it no longer exists
    pub fn load(data_dir: &Path, username: &str) -> Option<Self> {
        let site = SiteConfigStore::new(data_dir).load();
        site.credential(username)
            .map(|credential| Self::from_credential(username, credential))
    }
}

/// Session id -> username
pub struct SessionManager {
    sessions: Cache<String, String>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionManager {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(MAX_SESSIONS)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    /// Open a session and return its bearer id
    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let id = URL_SAFE_NO_PAD.encode(bytes);
        self.sessions.insert(id.clone(), username.to_string());
        id
    }

    pub fn username(&self, id: &str) -> Option<String> {
        self.sessions.get(id)
    }

    pub fn end(&self, id: &str) {
        self.sessions.invalidate(id);
    }

    /// End every session belonging to `username`
    pub fn end_user(&self, username: &str) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, user)| user == username)
            .map(|(id, _)| (*id).clone())
            .collect();

        for id in ids {
            self.sessions.invalidate(&id);
        }
    }
}

/// Extractor for authenticated routes
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub session_id: String,
    pub user: SessionSnapshot,
}

impl AuthContext {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "This section is for administrators only".to_string(),
            ))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session_id = bearer_token(parts)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer session".to_string()))?
            .to_string();

        let username = state
            .sessions
            .username(&session_id)
            .ok_or_else(|| ApiError::Unauthorized("Session expired or unknown".to_string()))?;

        let Some(user) = SessionSnapshot::load(&state.settings.data_dir, &username) else {
            state.sessions.end(&session_id);
            return Err(ApiError::Unauthorized("Account no longer exists".to_string()));
        };

        Ok(Self { session_id, user })
    }
}
