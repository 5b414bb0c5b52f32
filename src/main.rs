use std::sync::Arc;
use std::time::Duration;

mod config;
mod db;
mod error;
mod services;

use config::Config;
use services::backend::{GovernanceBackend, ZmqBackend};
use services::events::EventRouter;
use services::notifications::NotificationHandlers;
use services::scheduler::{RetryPolicy, Scheduler};
use services::telegram::{ChatDelivery, TelegramService};
use services::init;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Initialize tracing; the guard flushes the log file on exit
    let _log_guard = init::init_tracing(&config.logging);

    tracing::info!("Starting governance relay for chat {}", config.telegram.chat_id);

    // Initialize database
    let pool = init::init_db(&config).await?;
    init::import_legacy_state(&pool, config.startup.legacy_state_file.as_deref()).await?;

    // Initialize services
    let telegram: Arc<dyn ChatDelivery> = Arc::new(TelegramService::new(&config.telegram).await?);
    let backend: Arc<dyn GovernanceBackend> = Arc::new(ZmqBackend::new(&config.backend));

    // Create shutdown notifier for background workers
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    let (scheduler, scheduler_handle) = Scheduler::start(
        RetryPolicy::from(&config.scheduler),
        config.telegram.chat_id,
        telegram,
        shutdown_tx.subscribe(),
    );

    let handlers = Arc::new(NotificationHandlers::new(pool.clone(), backend, scheduler));
    let router = EventRouter::new(handlers.clone());

    // Spawn background workers (returns JoinHandles so we can await shutdown)
    let mut bg_handles =
        init::spawn_background_workers(&config, handlers, router, &shutdown_tx);
    bg_handles.push(scheduler_handle);

    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    tracing::info!("Shutdown signal received, notifying background workers");
    let _ = shutdown_tx.send(());

    // Give background workers some time to finish their work.
    let shutdown_wait = Duration::from_secs(15);
    tracing::info!(
        "Waiting up to {}s for background workers to exit",
        shutdown_wait.as_secs()
    );

    let bg_wait = async {
        for h in bg_handles {
            let _ = h.await;
        }
    };
    if tokio::time::timeout(shutdown_wait, bg_wait).await.is_err() {
        tracing::warn!("Background workers did not exit in time");
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
