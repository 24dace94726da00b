use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use nota_core::db::{Database, LibSqlReplicaStore, ReplicaStore};
use nota_core::models::{Note, NoteColor};
use nota_core::sync::HttpServerClient;

use crate::error::CliError;

/// Open local replica; the database handle must outlive the store
pub struct LocalReplica {
    _db: Database,
    pub store: Arc<LibSqlReplicaStore>,
}

pub async fn open_replica(db_path: &Path) -> Result<LocalReplica, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Database::open(db_path).await?;
    let store = Arc::new(LibSqlReplicaStore::new(db.connection().clone()));
    Ok(LocalReplica { _db: db, store })
}

pub fn default_db_path(override_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }
    dirs::data_dir().map_or_else(
        || PathBuf::from("nota.db"),
        |data| data.join("nota").join("replica.db"),
    )
}

/// Server connection settings from flags or environment
pub struct ServerSettings {
    pub client: HttpServerClient,
    pub token: String,
}

pub fn server_settings(
    server_url: Option<String>,
    token: Option<String>,
) -> Result<ServerSettings, CliError> {
    let url = server_url
        .or_else(|| env::var("NOTA_SERVER_URL").ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::SyncNotConfigured)?;
    let token = token
        .or_else(|| env::var("NOTA_TOKEN").ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(CliError::SyncNotConfigured)?;

    Ok(ServerSettings {
        client: HttpServerClient::new(url, token.clone())?,
        token,
    })
}

/// Resolve a note by full id or unique id prefix
pub async fn resolve_note(store: &LibSqlReplicaStore, query: &str) -> Result<Note, CliError> {
    if let Ok(note_id) = query.parse() {
        if let Some(note) = store.get_note(&note_id).await? {
            return Ok(note);
        }
    }

    let matches: Vec<Note> = store
        .list_notes(true)
        .await?
        .into_iter()
        .filter(|note| note.id.as_str().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::NoteNotFound(query.to_string())),
        1 => Ok(matches.into_iter().next().expect("one match")),
        _ => Err(CliError::AmbiguousNoteId(query.to_string())),
    }
}

pub fn parse_color(value: &str) -> Result<NoteColor, CliError> {
    value
        .parse()
        .map_err(|_| CliError::UnknownColor(value.to_string()))
}

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub color: String,
    pub pinned: bool,
    pub archived: bool,
    pub sync_status: String,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn note_to_item(note: &Note) -> NoteListItem {
    NoteListItem {
        id: note.id.as_str(),
        title: note.title.clone(),
        preview: note.content.lines().next().unwrap_or("").chars().take(60).collect(),
        color: note.color.to_string(),
        pinned: note.is_pinned,
        archived: note.is_archived,
        sync_status: note.sync_status.as_str().to_string(),
        updated_at: note.updated_at,
        relative_time: relative_time(note.updated_at),
    }
}

/// Human-friendly "how long ago" for listings
pub fn relative_time(unix_ms: i64) -> String {
    let elapsed_secs = (chrono::Utc::now().timestamp_millis() - unix_ms) / 1_000;
    match elapsed_secs {
        secs if secs < 0 => "just now".to_string(),
        secs if secs < 60 => format!("{secs}s ago"),
        secs if secs < 3_600 => format!("{}m ago", secs / 60),
        secs if secs < 86_400 => format!("{}h ago", secs / 3_600),
        secs => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_relative_time_buckets() {
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(relative_time(now + 10_000), "just now");
        assert!(relative_time(now - 30_000).ends_with("s ago"));
        assert!(relative_time(now - 120_000).ends_with("m ago"));
        assert!(relative_time(now - 7_200_000).ends_with("h ago"));
        assert!(relative_time(now - 172_800_000).ends_with("d ago"));
    }
}
