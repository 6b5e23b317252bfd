use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    change_password, confirm_password_reset, delete_user, export_alerts, get_profile,
    get_settings, get_thresholds, health_check, list_alerts, list_users, login, logout,
    put_settings, put_thresholds, register, request_password_reset, run_check, update_profile,
    AppState,
};
use crate::alerts::AlertChecker;
use crate::auth::SessionManager;
use crate::config::Settings;

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Authentication
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/register", post(register))
        .route("/auth/password-reset", post(request_password_reset))
        .route("/auth/password-reset/confirm", post(confirm_password_reset))
        // Profile
        .route("/profile", get(get_profile).put(update_profile))
        .route("/profile/password", post(change_password))
        // Alerting configuration
        .route("/thresholds", get(get_thresholds).put(put_thresholds))
        .route("/settings", get(get_settings).put(put_settings))
        // Alerts
        .route("/alerts", get(list_alerts))
        .route("/alerts/export.csv", get(export_alerts))
        .route("/checks/run", post(run_check))
        // User management
        .route("/users", get(list_users))
        .route("/users/:username", delete(delete_user))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server, plus the alert schedule when one is configured
pub async fn run_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let source = Arc::new(settings.influx_client()?);
    let notifier = settings.notifier();

    let checker = Arc::new(
        AlertChecker::new(settings.data_dir.clone(), source, Arc::clone(&notifier))
            .with_lookback(settings.lookback)
            .with_policy(settings.digest_policy),
    );

    let schedule = settings.check_interval.map(|interval| {
        tracing::info!("Scheduled alert checks every {:?}", interval);
        Arc::clone(&checker).start(interval)
    });
    if schedule.is_none() {
        tracing::info!("No check interval configured, relying on an external scheduler");
    }

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    let state = Arc::new(AppState {
        sessions: SessionManager::new(settings.session_ttl),
        settings,
        checker: Arc::clone(&checker),
        notifier,
    });

    let app = build_router(state);

    tracing::info!("Starting PowerWatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&checker)))
        .await?;

    if let Some(handle) = schedule {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Alert checker task ended abnormally");
        }
    }

    tracing::info!("PowerWatch server stopped");
    Ok(())
}

async fn shutdown_signal(checker: Arc<AlertChecker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }

    tracing::info!("Shutdown signal received, stopping alert checker...");
    checker.stop().await;
}
