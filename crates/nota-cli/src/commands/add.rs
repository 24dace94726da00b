use std::path::Path;

use nota_core::db::ReplicaStore;
use nota_core::models::{Note, SyncAction};

use crate::commands::common::{open_replica, parse_color};
use crate::error::CliError;

pub async fn run_add(
    title: &str,
    content_parts: &[String],
    color: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut note = Note::new(title, content_parts.join(" "));
    if let Some(color) = color {
        note.color = parse_color(color)?;
    }

    let replica = open_replica(db_path).await?;
    let note = replica.store.upsert_note(note).await?;
    replica
        .store
        .enqueue(SyncAction::create(note.clone()))
        .await?;

    println!("{}", note.id);
    Ok(())
}
