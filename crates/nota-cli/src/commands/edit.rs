use std::path::Path;

use nota_core::db::ReplicaStore;
use nota_core::models::{NotePatch, SyncAction};

use crate::commands::common::{open_replica, parse_color, resolve_note};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    title: Option<&str>,
    content: Option<&str>,
    color: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    if title.is_none() && content.is_none() && color.is_none() {
        return Err(CliError::EmptyEdit);
    }

    let replica = open_replica(db_path).await?;
    let mut note = resolve_note(&replica.store, id).await?;

    if let Some(title) = title {
        note.title = title.to_string();
    }
    if let Some(content) = content {
        note.content = content.to_string();
    }
    if let Some(color) = color {
        note.color = parse_color(color)?;
    }

    let note = replica.store.upsert_note(note).await?;
    replica
        .store
        .enqueue(SyncAction::update(NotePatch::from_note(&note)))
        .await?;

    println!("Updated {}", note.id);
    Ok(())
}
