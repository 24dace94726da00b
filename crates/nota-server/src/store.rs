//! Canonical note storage
//!
//! The server of record owns the canonical note table. Every operation is
//! scoped by the caller's verified identity; a mutation or listing never
//! crosses scope boundaries. Client-supplied ids are honored on creation so
//! optimistic offline creation needs no id mapping.

use async_trait::async_trait;
use libsql::{Builder, Connection};
use thiserror::Error;

use nota_core::models::{now_ms, Note, NoteId, NotePatch};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),
    #[error("Database error: {0}")]
    Database(String),
}

/// Persistence boundary for canonical notes
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert or fully replace a note, honoring the client-supplied id
    async fn create(&self, scope: &str, note: &Note) -> Result<Note, StoreError>;

    /// Apply a partial update; `None` when the note does not exist in scope
    async fn apply_patch(&self, scope: &str, patch: &NotePatch)
        -> Result<Option<Note>, StoreError>;

    /// Delete a note, returning it; `None` when it does not exist in scope
    async fn delete(&self, scope: &str, id: &NoteId) -> Result<Option<Note>, StoreError>;

    /// Notes with `updated_at` strictly greater than `since`; all notes in
    /// scope when `since` is `None`
    async fn list_since(&self, scope: &str, since: Option<i64>) -> Result<Vec<Note>, StoreError>;
}

/// libSQL implementation of [`NoteStore`]
#[derive(Clone)]
pub struct LibSqlNoteStore {
    conn: Connection,
}

impl LibSqlNoteStore {
    /// Open the canonical store at the given path
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        let store = Self { conn };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS notes (
                scope TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                color TEXT NOT NULL DEFAULT 'white',
                is_pinned INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (scope, id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_notes_scope_updated ON notes(scope, updated_at)",
        ];
        for stmt in statements {
            self.conn.execute(stmt, ()).await?;
        }
        Ok(())
    }

    fn parse_note(row: &libsql::Row) -> Result<Note, StoreError> {
        let id: String = row.get(0)?;
        let color: String = row.get(3)?;
        Ok(Note {
            id: id
                .parse()
                .map_err(|_| StoreError::Database(format!("invalid note id: {id}")))?,
            title: row.get(1)?,
            content: row.get(2)?,
            color: color.parse().unwrap_or_default(),
            is_pinned: row.get::<i32>(4)? != 0,
            is_archived: row.get::<i32>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
            sync_status: nota_core::models::SyncStatus::Synced,
            is_deleted: false,
        })
    }

    async fn fetch(&self, scope: &str, id: &NoteId) -> Result<Option<Note>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, title, content, color, is_pinned, is_archived, created_at, updated_at
                 FROM notes WHERE scope = ? AND id = ?",
                libsql::params![scope, id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_note(&row)?)),
            None => Ok(None),
        }
    }

    /// Server-stamped timestamp, strictly after the note's previous one
    fn stamp(previous: Option<i64>) -> i64 {
        now_ms().max(previous.unwrap_or(0) + 1)
    }
}

#[async_trait]
impl NoteStore for LibSqlNoteStore {
    async fn create(&self, scope: &str, note: &Note) -> Result<Note, StoreError> {
        let previous = self.fetch(scope, &note.id).await?.map(|n| n.updated_at);
        let mut canonical = note.clone();
        canonical.updated_at = Self::stamp(previous);

        self.conn
            .execute(
                "INSERT INTO notes (scope, id, title, content, color, is_pinned, is_archived,
                                    created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(scope, id) DO UPDATE SET
                     title = excluded.title,
                     content = excluded.content,
                     color = excluded.color,
                     is_pinned = excluded.is_pinned,
                     is_archived = excluded.is_archived,
                     updated_at = excluded.updated_at",
                libsql::params![
                    scope,
                    canonical.id.as_str(),
                    canonical.title.clone(),
                    canonical.content.clone(),
                    canonical.color.as_str(),
                    i32::from(canonical.is_pinned),
                    i32::from(canonical.is_archived),
                    canonical.created_at,
                    canonical.updated_at
                ],
            )
            .await?;

        Ok(canonical)
    }

    async fn apply_patch(
        &self,
        scope: &str,
        patch: &NotePatch,
    ) -> Result<Option<Note>, StoreError> {
        let Some(mut note) = self.fetch(scope, &patch.id).await? else {
            return Ok(None);
        };

        if let Some(title) = &patch.title {
            note.title.clone_from(title);
        }
        if let Some(content) = &patch.content {
            note.content.clone_from(content);
        }
        if let Some(color) = patch.color {
            note.color = color;
        }
        if let Some(is_pinned) = patch.is_pinned {
            note.is_pinned = is_pinned;
        }
        if let Some(is_archived) = patch.is_archived {
            note.is_archived = is_archived;
        }
        note.updated_at = Self::stamp(Some(note.updated_at));

        self.conn
            .execute(
                "UPDATE notes
                 SET title = ?, content = ?, color = ?, is_pinned = ?, is_archived = ?,
                     updated_at = ?
                 WHERE scope = ? AND id = ?",
                libsql::params![
                    note.title.clone(),
                    note.content.clone(),
                    note.color.as_str(),
                    i32::from(note.is_pinned),
                    i32::from(note.is_archived),
                    note.updated_at,
                    scope,
                    note.id.as_str()
                ],
            )
            .await?;

        Ok(Some(note))
    }

    async fn delete(&self, scope: &str, id: &NoteId) -> Result<Option<Note>, StoreError> {
        let Some(note) = self.fetch(scope, id).await? else {
            return Ok(None);
        };

        self.conn
            .execute(
                "DELETE FROM notes WHERE scope = ? AND id = ?",
                libsql::params![scope, id.as_str()],
            )
            .await?;
        Ok(Some(note))
    }

    async fn list_since(&self, scope: &str, since: Option<i64>) -> Result<Vec<Note>, StoreError> {
        let mut rows = match since {
            Some(since) => {
                self.conn
                    .query(
                        "SELECT id, title, content, color, is_pinned, is_archived,
                                created_at, updated_at
                         FROM notes
                         WHERE scope = ? AND updated_at > ?
                         ORDER BY updated_at ASC",
                        libsql::params![scope, since],
                    )
                    .await?
            }
            None => {
                self.conn
                    .query(
                        "SELECT id, title, content, color, is_pinned, is_archived,
                                created_at, updated_at
                         FROM notes
                         WHERE scope = ?
                         ORDER BY updated_at ASC",
                        [scope],
                    )
                    .await?
            }
        };

        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            notes.push(Self::parse_note(&row)?);
        }
        Ok(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn setup() -> LibSqlNoteStore {
        LibSqlNoteStore::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_honors_client_id() {
        let store = setup().await;
        let note = Note::new("title", "content");

        let canonical = store.create("alice", &note).await.unwrap();
        assert_eq!(canonical.id, note.id);
        assert!(canonical.updated_at >= note.updated_at);

        let fetched = store.fetch("alice", &note.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, note.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scope_isolation() {
        let store = setup().await;
        let note = Note::new("private", "");
        store.create("alice", &note).await.unwrap();

        assert!(store.fetch("bob", &note.id).await.unwrap().is_none());
        assert!(store.list_since("bob", None).await.unwrap().is_empty());

        let patch = NotePatch {
            id: note.id,
            title: Some("stolen".to_string()),
            content: None,
            color: None,
            is_pinned: None,
            is_archived: None,
        };
        assert!(store.apply_patch("bob", &patch).await.unwrap().is_none());
        assert!(store.delete("bob", &note.id).await.unwrap().is_none());

        // Alice's copy is untouched.
        let mine = store.fetch("alice", &note.id).await.unwrap().unwrap();
        assert_eq!(mine.title, "private");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_patch_applies_only_set_fields() {
        let store = setup().await;
        let note = store.create("alice", &Note::new("title", "body")).await.unwrap();

        let patch = NotePatch {
            id: note.id,
            title: None,
            content: Some("edited".to_string()),
            color: None,
            is_pinned: Some(true),
            is_archived: None,
        };
        let updated = store.apply_patch("alice", &patch).await.unwrap().unwrap();

        assert_eq!(updated.title, "title");
        assert_eq!(updated.content, "edited");
        assert!(updated.is_pinned);
        assert!(updated.updated_at > note.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_updated_at_strictly_increases() {
        let store = setup().await;
        let note = store.create("alice", &Note::new("a", "")).await.unwrap();

        let patch = NotePatch {
            id: note.id,
            title: None,
            content: None,
            color: None,
            is_pinned: Some(true),
            is_archived: None,
        };
        let first = store.apply_patch("alice", &patch).await.unwrap().unwrap();
        let second = store.apply_patch("alice", &patch).await.unwrap().unwrap();

        assert!(first.updated_at > note.updated_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_since_strictly_greater() {
        let store = setup().await;
        let first = store.create("alice", &Note::new("first", "")).await.unwrap();
        let second = store.create("alice", &Note::new("second", "")).await.unwrap();

        let all = store.list_since("alice", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let after_first = store
            .list_since("alice", Some(first.updated_at))
            .await
            .unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id, second.id);

        let after_second = store
            .list_since("alice", Some(second.updated_at))
            .await
            .unwrap();
        assert!(after_second.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_returns_note() {
        let store = setup().await;
        let note = store.create("alice", &Note::new("bye", "")).await.unwrap();

        let deleted = store.delete("alice", &note.id).await.unwrap().unwrap();
        assert_eq!(deleted.id, note.id);
        assert!(store.fetch("alice", &note.id).await.unwrap().is_none());
        assert!(store.delete("alice", &note.id).await.unwrap().is_none());
    }
}
