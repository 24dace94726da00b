use std::path::Path;

use serde::Serialize;

use nota_core::db::ReplicaStore;
use nota_core::models::SyncStatus;

use crate::commands::common::open_replica;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    pending_changes: usize,
    checkpoint: i64,
    checkpoint_iso: Option<String>,
    notes_pending: usize,
    notes_failed: usize,
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;

    let pending_changes = replica.store.pending_count().await?;
    let checkpoint = replica.store.checkpoint().await?;
    let notes = replica.store.list_notes(true).await?;
    let notes_pending = notes
        .iter()
        .filter(|n| n.sync_status == SyncStatus::Pending)
        .count();
    let notes_failed = notes
        .iter()
        .filter(|n| n.sync_status == SyncStatus::Error)
        .count();

    let report = StatusReport {
        pending_changes,
        checkpoint,
        checkpoint_iso: chrono::DateTime::from_timestamp_millis(checkpoint)
            .filter(|_| checkpoint > 0)
            .map(|dt| dt.to_rfc3339()),
        notes_pending,
        notes_failed,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Pending changes: {}", report.pending_changes);
    match &report.checkpoint_iso {
        Some(iso) => println!("Last reconciled with server: {iso}"),
        None => println!("Never synced"),
    }
    if report.notes_pending > 0 {
        println!("Notes awaiting sync: {}", report.notes_pending);
    }
    if report.notes_failed > 0 {
        println!(
            "Notes with failed sync: {} (run `nota sync --force` to retry)",
            report.notes_failed
        );
    }
    Ok(())
}
