use std::path::Path;

use nota_core::db::ReplicaStore;

use crate::commands::common::{note_to_item, open_replica, NoteListItem};
use crate::error::CliError;

pub async fn run_list(include_archived: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let replica = open_replica(db_path).await?;
    let notes = replica.store.list_notes(include_archived).await?;

    if as_json {
        let items: Vec<NoteListItem> = notes.iter().map(note_to_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if notes.is_empty() {
        println!("No notes yet. Create one with `nota add`.");
        return Ok(());
    }

    for note in &notes {
        let item = note_to_item(note);
        let mut markers = String::new();
        if item.pinned {
            markers.push('*');
        }
        if item.archived {
            markers.push('a');
        }
        if item.sync_status != "synced" {
            markers.push('~');
        }
        let short_id: String = item.id.chars().take(8).collect();
        println!(
            "{short_id}  {:<30}  {:<10}  {markers}",
            item.title, item.relative_time
        );
    }
    Ok(())
}
