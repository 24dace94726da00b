//! Local replica store
//!
//! Durable per-device cache of notes plus the mutation queue, usable while
//! offline. Every mutating operation is immediately visible to subsequent
//! reads. Storage errors propagate to the caller; retry policy belongs to the
//! sync engine.

use libsql::Connection;

use crate::error::{Error, Result};
use crate::models::{
    now_ms, EntryId, Note, NoteId, QueueEntry, SyncAction, SyncConflict, SyncStatus,
    MAX_PUSH_ATTEMPTS,
};

/// Metadata key holding the pull checkpoint
const CHECKPOINT_KEY: &str = "checkpoint";

/// Conflict resolution strategy label recorded with flagged conflicts
const CONFLICT_STRATEGY: &str = "server-wins-grace";

/// Trait for replica storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ReplicaStore {
    /// Write or overwrite a note from a local mutation; stamps it `pending`
    /// and advances `updated_at` monotonically
    async fn upsert_note(&self, note: Note) -> Result<Note>;

    /// Write a server-confirmed note exactly as received, stamped `synced`
    ///
    /// Internal sync-apply path; clears any soft-delete marker.
    async fn apply_server_note(&self, note: &Note) -> Result<()>;

    /// Get a note by ID, excluding soft-deleted notes
    async fn get_note(&self, id: &NoteId) -> Result<Option<Note>>;

    /// Get a note by ID including soft-deleted notes
    ///
    /// Sync paths use this so a pending deletion still counts as a pending
    /// local version during conflict resolution.
    async fn get_note_any(&self, id: &NoteId) -> Result<Option<Note>>;

    /// List notes, most-recently-updated first with pinned notes leading,
    /// excluding soft-deleted entries
    async fn list_notes(&self, include_archived: bool) -> Result<Vec<Note>>;

    /// Mark a note deleted and pending; physical removal waits for server
    /// confirmation
    async fn soft_delete(&self, id: &NoteId) -> Result<()>;

    /// Physically remove a note row (confirmed server deletion)
    async fn remove_note(&self, id: &NoteId) -> Result<()>;

    /// Flag a note whose queued mutation permanently failed
    async fn mark_note_error(&self, id: &NoteId) -> Result<()>;

    /// Append a mutation to the queue, FIFO by enqueue time
    async fn enqueue(&self, action: SyncAction) -> Result<QueueEntry>;

    /// Snapshot of the queue in FIFO order
    async fn queue(&self) -> Result<Vec<QueueEntry>>;

    /// Remove a confirmed entry
    async fn drain_entry(&self, id: &EntryId) -> Result<()>;

    /// Record a failed push attempt; returns the new persisted retry count
    async fn record_entry_failure(&self, id: &EntryId, error: &str) -> Result<u32>;

    /// Take an entry out of the automatic retry path (permanent failure)
    async fn exhaust_entry(&self, id: &EntryId, error: &str) -> Result<()>;

    /// Clear retry counts and error markers for manual retry
    async fn reset_retries(&self) -> Result<()>;

    /// Number of queued mutations
    async fn pending_count(&self) -> Result<usize>;

    /// The pull checkpoint (0 when never synced)
    async fn checkpoint(&self) -> Result<i64>;

    /// Advance the pull checkpoint to a server-reported timestamp
    async fn set_checkpoint(&self, timestamp: i64) -> Result<()>;

    /// Record a flagged conflict (informational only)
    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        server_updated_at: i64,
    ) -> Result<()>;

    /// Most recent flagged conflicts, newest first
    async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `ReplicaStore`
#[derive(Clone)]
pub struct LibSqlReplicaStore {
    conn: Connection,
}

impl LibSqlReplicaStore {
    /// Create a new store over the given connection
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn parse_note(row: &libsql::Row) -> Result<Note> {
        let id: String = row.get(0)?;
        let color: String = row.get(3)?;
        let sync_status: String = row.get(8)?;
        Ok(Note {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid note id: {id}")))?,
            title: row.get(1)?,
            content: row.get(2)?,
            color: color.parse().unwrap_or_default(),
            is_pinned: row.get::<i32>(4)? != 0,
            is_archived: row.get::<i32>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_status: sync_status.parse().unwrap_or_default(),
            is_deleted: row.get::<i32>(9)? != 0,
        })
    }

    async fn fetch_note(&self, id: &NoteId, include_deleted: bool) -> Result<Option<Note>> {
        let sql = if include_deleted {
            "SELECT id, title, content, color, is_pinned, is_archived,
                    created_at, updated_at, sync_status, is_deleted
             FROM notes WHERE id = ?"
        } else {
            "SELECT id, title, content, color, is_pinned, is_archived,
                    created_at, updated_at, sync_status, is_deleted
             FROM notes WHERE id = ? AND is_deleted = 0"
        };

        let mut rows = self.conn.query(sql, [id.as_str()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    async fn write_note(&self, note: &Note) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notes (id, title, content, color, is_pinned, is_archived,
                                    created_at, updated_at, sync_status, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                     title = excluded.title,
                     content = excluded.content,
                     color = excluded.color,
                     is_pinned = excluded.is_pinned,
                     is_archived = excluded.is_archived,
                     created_at = excluded.created_at,
                     updated_at = excluded.updated_at,
                     sync_status = excluded.sync_status,
                     is_deleted = excluded.is_deleted",
                libsql::params![
                    note.id.as_str(),
                    note.title.clone(),
                    note.content.clone(),
                    note.color.as_str(),
                    i32::from(note.is_pinned),
                    i32::from(note.is_archived),
                    note.created_at,
                    note.updated_at,
                    note.sync_status.as_str(),
                    i32::from(note.is_deleted)
                ],
            )
            .await?;
        Ok(())
    }
}

impl ReplicaStore for LibSqlReplicaStore {
    async fn upsert_note(&self, mut note: Note) -> Result<Note> {
        // Clamp against the stored copy so updated_at strictly increases
        // even when the caller re-submits a stale in-memory note.
        let floor = self
            .fetch_note(&note.id, true)
            .await?
            .map_or(0, |existing| existing.updated_at);
        note.updated_at = now_ms().max(floor + 1).max(note.updated_at);
        note.sync_status = SyncStatus::Pending;

        self.write_note(&note).await?;
        Ok(note)
    }

    async fn apply_server_note(&self, note: &Note) -> Result<()> {
        let mut note = note.clone();
        note.sync_status = SyncStatus::Synced;
        note.is_deleted = false;
        self.write_note(&note).await
    }

    async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.fetch_note(id, false).await
    }

    async fn get_note_any(&self, id: &NoteId) -> Result<Option<Note>> {
        self.fetch_note(id, true).await
    }

    async fn list_notes(&self, include_archived: bool) -> Result<Vec<Note>> {
        let sql = if include_archived {
            "SELECT id, title, content, color, is_pinned, is_archived,
                    created_at, updated_at, sync_status, is_deleted
             FROM notes
             WHERE is_deleted = 0
             ORDER BY is_pinned DESC, updated_at DESC"
        } else {
            "SELECT id, title, content, color, is_pinned, is_archived,
                    created_at, updated_at, sync_status, is_deleted
             FROM notes
             WHERE is_deleted = 0 AND is_archived = 0
             ORDER BY is_pinned DESC, updated_at DESC"
        };

        let mut rows = self.conn.query(sql, ()).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }

    async fn soft_delete(&self, id: &NoteId) -> Result<()> {
        let now = now_ms();
        let rows = self
            .conn
            .execute(
                "UPDATE notes
                 SET is_deleted = 1,
                     sync_status = 'pending',
                     updated_at = MAX(?, updated_at + 1)
                 WHERE id = ? AND is_deleted = 0",
                libsql::params![now, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn remove_note(&self, id: &NoteId) -> Result<()> {
        self.conn
            .execute("DELETE FROM notes WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn mark_note_error(&self, id: &NoteId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notes SET sync_status = 'error' WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn enqueue(&self, action: SyncAction) -> Result<QueueEntry> {
        let entry = QueueEntry::new(action);
        let action_json = serde_json::to_string(&entry.action)?;

        self.conn
            .execute(
                "INSERT INTO sync_queue (id, action, created_at, retry_count, last_error)
                 VALUES (?, ?, ?, ?, NULL)",
                libsql::params![
                    entry.id.as_str(),
                    action_json,
                    entry.created_at,
                    i64::from(entry.retry_count)
                ],
            )
            .await?;
        Ok(entry)
    }

    async fn queue(&self) -> Result<Vec<QueueEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, action, created_at, retry_count, last_error
                 FROM sync_queue
                 ORDER BY created_at ASC, id ASC",
                (),
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let action_json: String = row.get(1)?;
            entries.push(QueueEntry {
                id: id
                    .parse()
                    .map_err(|_| Error::Database(format!("invalid entry id: {id}")))?,
                action: serde_json::from_str(&action_json)?,
                created_at: row.get(2)?,
                retry_count: u32::try_from(row.get::<i64>(3)?).unwrap_or(u32::MAX),
                last_error: match row.get_value(4)? {
                    libsql::Value::Text(text) => Some(text),
                    _ => None,
                },
            });
        }
        Ok(entries)
    }

    async fn drain_entry(&self, id: &EntryId) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?", [id.as_str()])
            .await?;
        Ok(())
    }

    async fn record_entry_failure(&self, id: &EntryId, error: &str) -> Result<u32> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?
                 WHERE id = ?",
                libsql::params![error, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::EntryNotFound(id.to_string()));
        }

        let mut result = self
            .conn
            .query(
                "SELECT retry_count FROM sync_queue WHERE id = ?",
                [id.as_str()],
            )
            .await?;
        match result.next().await? {
            Some(row) => Ok(u32::try_from(row.get::<i64>(0)?).unwrap_or(u32::MAX)),
            None => Err(Error::EntryNotFound(id.to_string())),
        }
    }

    async fn exhaust_entry(&self, id: &EntryId, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE sync_queue SET retry_count = MAX(retry_count, ?), last_error = ?
                 WHERE id = ?",
                libsql::params![i64::from(MAX_PUSH_ATTEMPTS), error, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn reset_retries(&self) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sync_queue SET retry_count = 0, last_error = NULL",
                (),
            )
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(usize::try_from(row.get::<i64>(0)?).unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn checkpoint(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM metadata WHERE key = ?",
                [CHECKPOINT_KEY],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let value: String = row.get(0)?;
                value
                    .parse()
                    .map_err(|_| Error::Database(format!("invalid checkpoint: {value}")))
            }
            None => Ok(0),
        }
    }

    async fn set_checkpoint(&self, timestamp: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
                libsql::params![CHECKPOINT_KEY, timestamp.to_string()],
            )
            .await?;
        Ok(())
    }

    async fn record_conflict(
        &self,
        note_id: &NoteId,
        local_updated_at: i64,
        server_updated_at: i64,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                     (note_id, local_updated_at, server_updated_at, resolved_at, strategy)
                 VALUES (?, ?, ?, ?, ?)",
                libsql::params![
                    note_id.as_str(),
                    local_updated_at,
                    server_updated_at,
                    now_ms(),
                    CONFLICT_STRATEGY
                ],
            )
            .await?;
        Ok(())
    }

    async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, note_id, local_updated_at, server_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                note_id: row.get(1)?,
                local_updated_at: row.get(2)?,
                server_updated_at: row.get(3)?,
                resolved_at: row.get(4)?,
                strategy: row.get(5)?,
            });
        }
        Ok(conflicts)
    }
}
