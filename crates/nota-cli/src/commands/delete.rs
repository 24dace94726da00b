use std::path::Path;

use nota_core::db::ReplicaStore;
use nota_core::models::SyncAction;

use crate::commands::common::{open_replica, resolve_note};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let note = resolve_note(&replica.store, id).await?;

    replica.store.soft_delete(&note.id).await?;
    replica.store.enqueue(SyncAction::delete(note.id)).await?;

    println!("Deleted {}", note.id);
    Ok(())
}
