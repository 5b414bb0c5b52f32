//! Initialization helpers for the application:
//! - tracing subscriber (stdout plus optional daily log file)
//! - database connection + migrations, legacy state import
//! - background worker spawn helpers
//!
//! This module keeps `main.rs` down to wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::db::{LegacyState, MessageRegistryRepository};
use crate::services::backend::BackendSubscriber;
use crate::services::events::EventRouter;
use crate::services::notifications::NotificationHandlers;

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// When a log directory is configured, a daily rolling file is written as
/// well; keep the returned guard alive for the lifetime of the process so
/// buffered lines are flushed.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "governance_relay=info".into());

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "governance-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Open the registry database and run migrations.
///
/// Creates the parent directory of the database file if needed.
pub async fn init_db(config: &Config) -> Result<SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// One-shot import of a legacy JSON state file into an empty registry.
///
/// Returns the number of imported project messages; `0` when there was
/// nothing to do.
pub async fn import_legacy_state(pool: &SqlitePool, path: Option<&str>) -> Result<usize> {
    let Some(path) = path else {
        return Ok(0);
    };
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!("No legacy state file at {}", path.display());
        return Ok(0);
    }
    if !MessageRegistryRepository::is_empty(pool).await? {
        tracing::info!(
            "Message registry already populated; ignoring legacy state {}",
            path.display()
        );
        return Ok(0);
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let state: LegacyState = serde_json::from_str(&raw)?;
    let imported = MessageRegistryRepository::import_legacy(pool, &state).await?;
    tracing::info!(
        "Imported legacy state from {} with {} project messages",
        path.display(),
        imported
    );

    Ok(imported)
}

/// Spawn background workers:
/// - the backend event subscriber feeding the router
/// - the delayed startup refresh of the overview (and project messages)
///
/// Each worker listens for shutdown on the broadcast channel; the returned
/// handles let the caller await their exit.
pub fn spawn_background_workers(
    config: &Config,
    handlers: Arc<NotificationHandlers>,
    router: EventRouter<NotificationHandlers>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // Event subscriber
    {
        let subscriber = BackendSubscriber::new(&config.backend);
        let shutdown_rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = subscriber.run(router, shutdown_rx).await {
                tracing::error!("Backend subscriber stopped: {}", e);
            }
        }));
    }

    // Startup refresh
    if config.startup.refresh_enabled {
        let mut shutdown_rx = shutdown.subscribe();
        let delay = Duration::from_secs(config.startup.refresh_delay_seconds);
        let sync_projects = config.startup.sync_project_messages;
        handles.push(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Startup refresh cancelled by shutdown");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            tracing::info!("Running startup refresh");
            if let Err(e) = handlers.startup_refresh(sync_projects).await {
                tracing::warn!("Startup refresh failed: {}", e);
            }
        }));
    }

    handles
}
