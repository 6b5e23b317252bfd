use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{AlertChecker, AlertEvent, CheckRun, ExecutionMode, Notifier, ThresholdSet};
use crate::auth::{
    Accounts, AuthContext, AuthError, ProfileUpdate, Registration, ResetFlow, SessionManager,
    SessionSnapshot, UserSummary,
};
use crate::config::Settings;
use crate::export::alerts_to_csv;
use crate::store::{
    AlertLogStore, CheckerHealth, HealthStore, SiteConfigStore, ThresholdStore, UserProfile,
};

/// Application state shared across handlers
pub struct AppState {
    pub settings: Settings,
    /// Shared with the schedule so manual and scheduled runs serialize
    pub checker: Arc<AlertChecker>,
    /// Used for reset links
    pub notifier: Arc<dyn Notifier>,
    pub sessions: SessionManager,
}

impl AppState {
    fn accounts(&self) -> Accounts<'_> {
        Accounts::new(&self.settings.data_dir, self.settings.password_hasher())
            .with_allowed_domain(self.settings.allowed_email_domain.as_deref())
    }

    fn reset_flow(&self) -> ResetFlow<'_> {
        ResetFlow::new(
            &self.settings.data_dir,
            self.notifier.as_ref(),
            self.settings.password_hasher(),
            &self.settings.base_url,
        )
    }
}

/// Run account work that hashes or verifies a password on the blocking pool.
///
/// bcrypt at the configured cost takes long enough to stall a runtime worker.
async fn run_blocking<T, F>(state: &Arc<AppState>, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> Result<T, AuthError> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| ApiError::Internal(format!("Account task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checker: CheckerHealth,
}

/// GET /health: `degraded` while the checker keeps failing
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let checker = HealthStore::new(&state.settings.data_dir).load();
    let status = if checker.consecutive_failures > 0 {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        checker,
    })
}

// ============================================================================
// Authentication
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    /// Bearer session id
    pub token: String,
    pub user: SessionSnapshot,
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let user = run_blocking(&state, move |state| {
        state
            .accounts()
            .login(&request.username, &request.password)
    })
    .await?;
    let token = state.sessions.create(&user.username);

    Ok(Json(LoginResponse { token, user }))
}

/// POST /auth/logout: ends only the calling session
pub async fn logout(State(state): State<Arc<AppState>>, auth: AuthContext) -> StatusCode {
    state.sessions.end(&auth.session_id);
    StatusCode::NO_CONTENT
}

/// POST /auth/register: creates the credential and the notification profile
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(registration): Json<Registration>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let user = run_blocking(&state, move |state| state.accounts().register(registration)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub username: String,
}

/// POST /auth/password-reset: always 202, known user or not
pub async fn request_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if request.username.trim().is_empty() {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }

    state
        .reset_flow()
        .request(&request.username, Utc::now())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "message": "If the user exists and has an email address, a reset link has been sent"
        })),
    ))
}

#[derive(Deserialize)]
pub struct ResetConfirmRequest {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /auth/password-reset/confirm: ends every session of the user
pub async fn confirm_password_reset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResetConfirmRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = run_blocking(&state, move |state| {
        state.reset_flow().redeem(
            &request.token,
            &request.new_password,
            &request.confirm_password,
            Utc::now(),
        )
    })
    .await?;
    state.sessions.end_user(&username);

    Ok(Json(serde_json::json!({ "username": username })))
}

// ============================================================================
// Profile
// ============================================================================

/// GET /profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.accounts().profile(&auth.user)?))
}

/// PUT /profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, ApiError> {
    Ok(Json(state.accounts().update_profile(&auth.user, update)?))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// POST /profile/password: ends every session of the user
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    let username = auth.user.username.clone();
    run_blocking(&state, move |state| {
        state.accounts().change_password(
            &username,
            &request.current_password,
            &request.new_password,
            &request.confirm_password,
        )
    })
    .await?;
    state.sessions.end_user(&auth.user.username);

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Thresholds and Settings
// ============================================================================

/// GET /thresholds
pub async fn get_thresholds(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> Json<ThresholdSet> {
    Json(ThresholdStore::new(&state.settings.data_dir).load())
}

/// PUT /thresholds: replaces the whole set
pub async fn put_thresholds(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(thresholds): Json<ThresholdSet>,
) -> Result<Json<ThresholdSet>, ApiError> {
    for (field, rule) in &thresholds {
        if field.trim().is_empty() {
            return Err(ApiError::BadRequest("Field names cannot be empty".to_string()));
        }
        let finite = rule.min.map_or(true, f64::is_finite) && rule.max.map_or(true, f64::is_finite);
        if !finite {
            return Err(ApiError::BadRequest(format!(
                "Thresholds for '{}' must be finite numbers",
                field
            )));
        }
    }

    ThresholdStore::new(&state.settings.data_dir)
        .save(&thresholds)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    tracing::info!(by = %auth.user.username, fields = thresholds.len(), "Thresholds updated");

    Ok(Json(thresholds))
}

pub const MAX_DIGEST_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct SiteSettings {
    /// Global switch for digest email
    pub notifications_enabled: bool,
    /// Minimum time between two digests
    pub alert_digest_interval_minutes: u64,
}

#[derive(Deserialize)]
pub struct SiteSettingsUpdate {
    pub notifications_enabled: Option<bool>,
    pub alert_digest_interval_minutes: Option<u64>,
}

/// GET /settings (admin)
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<SiteSettings>, ApiError> {
    auth.require_admin()?;
    let site = SiteConfigStore::new(&state.settings.data_dir).load();

    Ok(Json(SiteSettings {
        notifications_enabled: site.notifications_enabled,
        alert_digest_interval_minutes: site.digest_interval_minutes(),
    }))
}

/// PUT /settings (admin)
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(update): Json<SiteSettingsUpdate>,
) -> Result<Json<SiteSettings>, ApiError> {
    auth.require_admin()?;

    if let Some(minutes) = update.alert_digest_interval_minutes {
        if !(1..=MAX_DIGEST_INTERVAL_MINUTES).contains(&minutes) {
            return Err(ApiError::BadRequest(format!(
                "Digest interval must be between 1 and {} minutes",
                MAX_DIGEST_INTERVAL_MINUTES
            )));
        }
    }

    let site = SiteConfigStore::new(&state.settings.data_dir)
        .update(|config| {
            if let Some(enabled) = update.notifications_enabled {
                config.notifications_enabled = enabled;
            }
            if let Some(minutes) = update.alert_digest_interval_minutes {
                config.alert_digest_interval_minutes = Some(minutes);
            }
            config.clone()
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    tracing::info!(by = %auth.user.username, "Site settings updated");

    Ok(Json(SiteSettings {
        notifications_enabled: site.notifications_enabled,
        alert_digest_interval_minutes: site.digest_interval_minutes(),
    }))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Deserialize)]
pub struct AlertsQuery {
    /// Defaults to `DEFAULT_ALERTS_LIMIT`
    pub limit: Option<usize>,
}

pub const DEFAULT_ALERTS_LIMIT: usize = 10;

/// GET /alerts?limit=N: newest first
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
    Query(query): Query<AlertsQuery>,
) -> Json<Vec<AlertEvent>> {
    let limit = query.limit.unwrap_or(DEFAULT_ALERTS_LIMIT);
    Json(AlertLogStore::new(&state.settings.data_dir).recent(limit))
}

/// GET /alerts/export.csv
pub async fn export_alerts(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> Result<Response, ApiError> {
    let events = AlertLogStore::new(&state.settings.data_dir).load();
    let body = alerts_to_csv(&events).map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"logs_alertas.csv\"",
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /checks/run: a manual cycle, which never sends a digest
pub async fn run_check(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Json<CheckRun> {
    tracing::info!(by = %auth.user.username, "Manual alert check requested");
    Json(state.checker.run_once(ExecutionMode::Manual).await)
}

// ============================================================================
// User Management
// ============================================================================

/// GET /users (admin)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    auth.require_admin()?;
    Ok(Json(state.accounts().list_users()))
}

/// DELETE /users/:username (admin)
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth.require_admin()?;
    state.accounts().delete_user(&auth.user, &username)?;
    state.sessions.end_user(&username);

    Ok(Json(serde_json::json!({ "deleted": username })))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidCredentials => ApiError::Unauthorized(message),
            AuthError::UnknownUser(_) => ApiError::NotFound(message),
            AuthError::UserExists(_) => ApiError::Conflict(message),
            AuthError::EmailDomainNotAllowed(_)
            | AuthError::InvalidEmail(_)
            | AuthError::InvalidPassword(_)
            | AuthError::InvalidToken => ApiError::BadRequest(message),
            AuthError::Forbidden(_) => ApiError::Forbidden(message),
            AuthError::Hash(_) | AuthError::Store(_) | AuthError::Notifier(_) => {
                tracing::error!(error = %message, "Account operation failed");
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
