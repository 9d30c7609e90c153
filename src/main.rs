use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use coworkd::clock::SystemClock;
use coworkd::config::Config;
use coworkd::engine::Engine;
use coworkd::notify::NotifyHub;
use coworkd::scheduler;
use coworkd::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    coworkd::observability::init_tracing();

    let config = Config::from_env();
    coworkd::observability::init_metrics(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(&config.wal_path())?);

    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(SystemClock),
        notify.clone(),
        config.offset(),
        config.settings_ttl,
    );

    info!("coworkd started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc_offset: {}", config.offset());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler::run_completion_scheduler(
        engine.sweeper.clone(),
        engine.settings.clone(),
        engine.offset(),
        shutdown.clone(),
    ));
    let compactor_task = tokio::spawn(scheduler::run_compactor(
        store.clone(),
        config.compact_threshold,
        shutdown.clone(),
    ));

    // Override requests are logged until an outbound channel subscribes.
    let mut notifications = notify.subscribe_all();
    let notify_shutdown = shutdown.clone();
    let notify_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = notify_shutdown.cancelled() => return,
                received = notifications.recv() => match received {
                    Ok(n) => info!(notification = ?n, "notification"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "notification log lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    });

    wait_for_signal().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    let _ = tokio::join!(scheduler_task, compactor_task, notify_task);

    if let Err(e) = store.compact().await {
        tracing::error!(error = %e, "final WAL compaction failed");
    }
    info!("coworkd stopped");
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
