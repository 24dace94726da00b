//! Mutation queue model
//!
//! Every local mutation is recorded as a queue entry and replayed against the
//! server in FIFO enqueue order by the sync engine. Entries stay queued until
//! the server confirms them; the retry count is persisted on the entry so
//! retry state survives process restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::note::{now_ms, Note, NoteColor, NoteId};

/// Push attempts per entry before it is left for manual retry
pub const MAX_PUSH_ATTEMPTS: u32 = 5;

/// A unique identifier for a queue entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Partial note update carried by an `update` action
///
/// Only `Some` fields are applied by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    pub id: NoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<NoteColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

impl NotePatch {
    /// Patch carrying every mutable field of the note
    #[must_use]
    pub fn from_note(note: &Note) -> Self {
        Self {
            id: note.id,
            title: Some(note.title.clone()),
            content: Some(note.content.clone()),
            color: Some(note.color),
            is_pinned: Some(note.is_pinned),
            is_archived: Some(note.is_archived),
        }
    }
}

/// One not-yet-confirmed local mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncAction {
    Create {
        note: Note,
        timestamp: i64,
    },
    Update {
        patch: NotePatch,
        timestamp: i64,
    },
    Delete {
        note_id: NoteId,
        timestamp: i64,
    },
    Archive {
        note_id: NoteId,
        is_archived: bool,
        timestamp: i64,
    },
    Pin {
        note_id: NoteId,
        is_pinned: bool,
        timestamp: i64,
    },
}

impl SyncAction {
    /// Action creating the given note
    #[must_use]
    pub fn create(note: Note) -> Self {
        Self::Create {
            note,
            timestamp: now_ms(),
        }
    }

    /// Action applying the given patch
    #[must_use]
    pub fn update(patch: NotePatch) -> Self {
        Self::Update {
            patch,
            timestamp: now_ms(),
        }
    }

    /// Action deleting the given note
    #[must_use]
    pub fn delete(note_id: NoteId) -> Self {
        Self::Delete {
            note_id,
            timestamp: now_ms(),
        }
    }

    /// Action toggling the archive flag
    #[must_use]
    pub fn archive(note_id: NoteId, is_archived: bool) -> Self {
        Self::Archive {
            note_id,
            is_archived,
            timestamp: now_ms(),
        }
    }

    /// Action toggling the pin flag
    #[must_use]
    pub fn pin(note_id: NoteId, is_pinned: bool) -> Self {
        Self::Pin {
            note_id,
            is_pinned,
            timestamp: now_ms(),
        }
    }

    /// The note this action targets
    #[must_use]
    pub const fn note_id(&self) -> NoteId {
        match self {
            Self::Create { note, .. } => note.id,
            Self::Update { patch, .. } => patch.id,
            Self::Delete { note_id, .. }
            | Self::Archive { note_id, .. }
            | Self::Pin { note_id, .. } => *note_id,
        }
    }

    /// Wire name of the action kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Archive { .. } => "archive",
            Self::Pin { .. } => "pin",
        }
    }
}

/// A mutation queue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry identifier
    pub id: EntryId,
    /// The queued mutation
    pub action: SyncAction,
    /// Enqueue timestamp (Unix ms), defines FIFO order
    pub created_at: i64,
    /// Failed push attempts so far
    pub retry_count: u32,
    /// Message from the most recent failure, if any
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// Create a fresh entry for the given action
    #[must_use]
    pub fn new(action: SyncAction) -> Self {
        Self {
            id: EntryId::new(),
            action,
            created_at: now_ms(),
            retry_count: 0,
            last_error: None,
        }
    }

    /// Whether the entry has left the automatic retry path
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= MAX_PUSH_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_action_json_tag() {
        let action = SyncAction::delete(NoteId::new());
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "delete");
        assert!(json.get("note_id").is_some());
    }

    #[test]
    fn test_action_round_trip() {
        let note = Note::new("t", "c");
        let action = SyncAction::archive(note.id, true);
        let json = serde_json::to_string(&action).unwrap();
        let back: SyncAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_patch_skips_unset_fields() {
        let patch = NotePatch {
            id: NoteId::new(),
            title: Some("new".to_string()),
            content: None,
            color: None,
            is_pinned: None,
            is_archived: None,
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["title"], "new");
    }

    #[test]
    fn test_entry_exhaustion() {
        let mut entry = QueueEntry::new(SyncAction::delete(NoteId::new()));
        assert!(!entry.is_exhausted());
        entry.retry_count = MAX_PUSH_ATTEMPTS;
        assert!(entry.is_exhausted());
    }
}
