use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotally_worker::config::{LogFormat, WorkerConfig};
use annotally_worker::listener::RecomputeListener;
use annotally_worker::notify;
use annotally_worker::orchestrator::Recomputer;
use annotally_worker::queue::Dispatcher;
use annotally_worker::store::{PgRecomputeStore, RecomputeStore};
use annotally_worker::sweep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "annotally_worker=debug,annotally_db=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
    tracing::info!(
        mode = ?config.mode,
        batch_size = config.batch_size,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = annotally_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    annotally_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    annotally_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Recompute pipeline ---
    let store: Arc<dyn RecomputeStore> = Arc::new(PgRecomputeStore::new(pool.clone()));
    let recomputer = Arc::new(Recomputer::new(Arc::clone(&store), config.batch_size));
    let queue_cancel = CancellationToken::new();
    let (dispatcher, queue_handle) = Dispatcher::for_mode(
        config.mode,
        recomputer,
        config.queue_capacity,
        queue_cancel.clone(),
    );

    // --- Event listener ---
    let event_bus = Arc::new(annotally_events::EventBus::default());
    let listener_handle = tokio::spawn(
        RecomputeListener::new(dispatcher.clone()).run(event_bus.subscribe()),
    );
    tracing::info!("Recompute listener started");

    // --- Notification relay ---
    // Ingress services stop before the listener and the queue drain.
    let ingress_cancel = CancellationToken::new();
    let relay_handle = tokio::spawn(notify::run(
        pool.clone(),
        Arc::clone(&event_bus),
        ingress_cancel.clone(),
    ));

    // --- Consistency sweep ---
    let sweep_handle = config.sweep_interval.map(|every| {
        tokio::spawn(sweep::run(
            Arc::clone(&store),
            dispatcher.clone(),
            every,
            ingress_cancel.clone(),
        ))
    });

    shutdown_signal().await;

    // --- Shutdown ---
    tracing::info!("Stopping recompute services");
    ingress_cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(5), relay_handle).await;
    if let Some(handle) = sweep_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Consistency sweep stopped");
    }

    // Dropping the last bus handle closes the channel and ends the listener.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), listener_handle).await;
    tracing::info!("Recompute listener stopped");

    // The queue finishes the job in progress before exiting.
    queue_cancel.cancel();
    if let Some(handle) = queue_handle {
        let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        tracing::info!("Recompute queue stopped");
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
