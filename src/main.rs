//! PowerWatch
//!
//! Run with: cargo run -- <command>
//!
//! Commands:
//! - check [--manual-run]: one evaluator cycle; exits 1 when every query failed
//! - serve: HTTP API, plus scheduled checks when POWERWATCH_CHECK_INTERVAL_SECS is set
//! - hash-password: bcrypt hash of a password read from stdin
//! - set-password <username>: store a new password read from stdin
//!
//! Environment variables:
//! - POWERWATCH_DATA_DIR: Directory holding the flat files (default: .)
//! - INFLUXDB_URL, INFLUXDB_TOKEN, INFLUXDB_ORG, POWERWATCH_ALERT_BUCKET: time-series source
//! - RESEND_API_KEY, RESEND_FROM: email delivery (log only when unset)
//! - POWERWATCH_HOST, POWERWATCH_PORT: bind address (default: 0.0.0.0:8501)
//! - RUST_LOG: Log level (default: powerwatch=info,tower_http=info)

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use powerwatch::alerts::{AlertChecker, ExecutionMode};
use powerwatch::api::run_server;
use powerwatch::auth::AuthError;
use powerwatch::config::Settings;
use powerwatch::store::SiteConfigStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "powerwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Threshold alerting and digest notifications for PowerLogic metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding configuration, users and alert log
    #[arg(long, global = true, env = "POWERWATCH_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Run one evaluator cycle
    Check {
        /// Operator-triggered run; never sends a digest
        #[arg(long)]
        manual_run: bool,
    },

    /// Serve the HTTP API
    Serve,

    /// Print the bcrypt hash of a password read from stdin
    HashPassword,

    /// Replace a user's password with one read from stdin
    SetPassword {
        username: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "powerwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    match cli.command {
        Commands::Check { manual_run } => check(settings, manual_run).await,
        Commands::Serve => {
            tracing::info!("PowerWatch configuration:");
            tracing::info!("  Listen: {}:{}", settings.host, settings.port);
            tracing::info!("  Data dir: {}", settings.data_dir.display());
            tracing::info!("  InfluxDB: {} (bucket {})", settings.influx.url, settings.influx.bucket);
            tracing::info!("  Digest policy: {:?}", settings.digest_policy);

            run_server(settings).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::HashPassword => {
            let password = read_password()?;
            println!("{}", settings.password_hasher().hash(&password)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::SetPassword { username } => {
            let password = read_password()?;
            let hash = settings.password_hasher().hash(&password)?;

            let found = SiteConfigStore::new(&settings.data_dir).update(|config| {
                match config.credentials.usernames.get_mut(&username) {
                    Some(credential) => {
                        credential.password = hash;
                        true
                    }
                    None => false,
                }
            })?;
            if !found {
                return Err(AuthError::UnknownUser(username).into());
            }

            tracing::info!(username = %username, "Password updated");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn check(settings: Settings, manual_run: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mode = ExecutionMode::from_manual_flag(manual_run);
    let checker = AlertChecker::new(
        settings.data_dir.clone(),
        Arc::new(settings.influx_client()?),
        settings.notifier(),
    )
    .with_lookback(settings.lookback)
    .with_policy(settings.digest_policy);

    let run = checker.run_once(mode).await;
    tracing::info!(
        mode = %mode,
        alerts = run.report.new_alerts.len(),
        digest = ?run.digest,
        "Check complete"
    );

    if run.is_total_failure() {
        tracing::error!(
            fields = run.report.outcomes.len(),
            "Every time-series query failed"
        );
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// One line from stdin without its trailing newline
fn read_password() -> Result<String, Box<dyn std::error::Error>> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err("empty password".into());
    }
    Ok(password)
}
