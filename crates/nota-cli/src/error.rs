use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] nota_core::Error),
    #[error(transparent)]
    Client(#[from] nota_core::sync::ClientError),
    #[error(transparent)]
    Sync(#[from] nota_core::sync::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Note not found: {0}")]
    NoteNotFound(String),
    #[error("Note id prefix matches multiple notes: {0}")]
    AmbiguousNoteId(String),
    #[error("Unknown color: {0}")]
    UnknownColor(String),
    #[error("Nothing to update; pass at least one of --title, --content, --color")]
    EmptyEdit,
    #[error("Sync is not configured; set NOTA_SERVER_URL and NOTA_TOKEN or pass --server-url/--token")]
    SyncNotConfigured,
}
