use std::path::Path;

use nota_core::db::ReplicaStore;
use nota_core::models::SyncAction;

use crate::commands::common::{open_replica, resolve_note};
use crate::error::CliError;

pub async fn run_archive(id: &str, archived: bool, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let mut note = resolve_note(&replica.store, id).await?;

    note.is_archived = archived;
    let note = replica.store.upsert_note(note).await?;
    replica
        .store
        .enqueue(SyncAction::archive(note.id, archived))
        .await?;

    println!(
        "{} {}",
        if archived { "Archived" } else { "Unarchived" },
        note.id
    );
    Ok(())
}

pub async fn run_pin(id: &str, pinned: bool, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let mut note = resolve_note(&replica.store, id).await?;

    note.is_pinned = pinned;
    let note = replica.store.upsert_note(note).await?;
    replica
        .store
        .enqueue(SyncAction::pin(note.id, pinned))
        .await?;

    println!("{} {}", if pinned { "Pinned" } else { "Unpinned" }, note.id);
    Ok(())
}
