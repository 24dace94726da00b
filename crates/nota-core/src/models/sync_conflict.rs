//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded sync conflict resolved by strategy
///
/// Conflicts are auto-resolved in favor of the server; the record exists so
/// clients can surface what happened, never to block the sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Note involved in the conflict
    pub note_id: String,
    /// Local pending copy's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Server copy's timestamp that won
    pub server_updated_at: i64,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
