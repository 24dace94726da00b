use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use nota_core::db::ReplicaStore;
use nota_core::models::SyncConflict;
use nota_core::sync::SyncEngine;

use crate::commands::common::{open_replica, server_settings};
use crate::error::CliError;

pub async fn run_sync(
    force: bool,
    server_url: Option<String>,
    token: Option<String>,
    db_path: &Path,
) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let settings = server_settings(server_url, token)?;

    if force {
        replica.store.reset_retries().await?;
    }

    let engine = SyncEngine::new(replica.store.clone(), Arc::new(settings.client));
    let Some(report) = engine.sync().await? else {
        println!("A sync cycle is already running");
        return Ok(());
    };

    println!(
        "Pushed {} change(s), applied {} from server ({} conflict(s), {} still pending)",
        report.pushed, report.applied, report.conflicts, report.pending
    );
    if report.failed > 0 {
        println!(
            "{} change(s) failed; they stay queued, run `nota sync --force` to retry exhausted ones",
            report.failed
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub note_id: String,
    pub local_updated_at: i64,
    pub server_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

fn conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    let resolved_at_iso = chrono::DateTime::from_timestamp_millis(conflict.resolved_at)
        .map_or_else(String::new, |dt| dt.to_rfc3339());
    SyncConflictItem {
        id: conflict.id,
        note_id: conflict.note_id.clone(),
        local_updated_at: conflict.local_updated_at,
        server_updated_at: conflict.server_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso,
        strategy: conflict.strategy.clone(),
    }
}

pub async fn run_conflicts(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let conflicts = replica.store.conflicts(limit).await?;

    if as_json {
        let items: Vec<SyncConflictItem> = conflicts.iter().map(conflict_to_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for conflict in &conflicts {
        let item = conflict_to_item(conflict);
        println!(
            "{}  note {}  local@{}  server@{}  ({})",
            item.resolved_at_iso,
            item.note_id,
            item.local_updated_at,
            item.server_updated_at,
            item.strategy
        );
    }
    Ok(())
}
