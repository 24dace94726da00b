use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use nota_core::sync::{run_scheduler, RealtimeListener, SyncEngine};

use crate::commands::common::{open_replica, server_settings};
use crate::error::CliError;

/// Run the sync scheduler and the realtime listener until Ctrl-C
pub async fn run_watch(
    interval_secs: u64,
    server_url: Option<String>,
    token: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let settings = server_settings(server_url, token)?;

    let client = Arc::new(settings.client);
    let engine = Arc::new(SyncEngine::new(replica.store.clone(), client.clone()));

    let (wake_tx, wake_rx) = mpsc::channel(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Arc::new(RealtimeListener::new(
        replica.store.clone(),
        client.events_url(),
        settings.token,
        wake_tx.clone(),
    ));

    let scheduler = tokio::spawn(run_scheduler(
        engine.clone(),
        Duration::from_secs(interval_secs.max(1)),
        wake_rx,
    ));
    let listener_task = {
        let listener = listener.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { listener.run(shutdown_rx).await })
    };

    // Kick off an immediate cycle instead of waiting for the first tick.
    wake_tx.send(()).await.ok();

    println!("Watching for changes (Ctrl-C to stop)");
    tokio::signal::ctrl_c().await?;
    println!("Stopping...");

    shutdown_tx.send(true).ok();
    listener_task.await.ok();

    // Dropping every wake sender stops the scheduler; the listener held one.
    drop(listener);
    drop(wake_tx);
    scheduler.await.ok();

    Ok(())
}
