//! Note model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Current time as Unix milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A unique identifier for a note, using UUID v7 (time-sortable)
///
/// Generated client-side at creation time so offline creation never waits on
/// a server round trip, and never reassigned afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteId(Uuid);

impl NoteId {
    /// Create a new unique note ID using UUID v7
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

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Fixed color palette for notes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteColor {
    #[default]
    White,
    Red,
    Orange,
    Yellow,
    Green,
    Teal,
    Blue,
    Darkblue,
    Purple,
    Pink,
    Brown,
    Gray,
}

impl NoteColor {
    /// Lowercase name used on the wire and in storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Teal => "teal",
            Self::Blue => "blue",
            Self::Darkblue => "darkblue",
            Self::Purple => "purple",
            Self::Pink => "pink",
            Self::Brown => "brown",
            Self::Gray => "gray",
        }
    }
}

impl fmt::Display for NoteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "white" => Ok(Self::White),
            "red" => Ok(Self::Red),
            "orange" => Ok(Self::Orange),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            "teal" => Ok(Self::Teal),
            "blue" => Ok(Self::Blue),
            "darkblue" => Ok(Self::Darkblue),
            "purple" => Ok(Self::Purple),
            "pink" => Ok(Self::Pink),
            "brown" => Ok(Self::Brown),
            "gray" => Ok(Self::Gray),
            other => Err(format!("unknown note color: {other}")),
        }
    }
}

/// Replica-local sync state of a note
///
/// Never persisted server-side; tracks whether a local write still needs to
/// reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Matches the server's copy
    #[default]
    Synced,
    /// An unconfirmed local edit exists
    Pending,
    /// A queued mutation for this note permanently failed
    Error,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending" => Ok(Self::Pending),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier
    pub id: NoteId,
    /// Title text
    pub title: String,
    /// Body text
    pub content: String,
    /// Display color
    #[serde(default)]
    pub color: NoteColor,
    /// Pinned to the top of listings
    #[serde(default)]
    pub is_pinned: bool,
    /// Archived (hidden from the default listing)
    #[serde(default)]
    pub is_archived: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms), strictly increasing on every mutation
    pub updated_at: i64,
    /// Replica-local sync state, never sent on the wire
    #[serde(default, skip_serializing)]
    pub sync_status: SyncStatus,
    /// Replica-local soft-delete marker, never sent on the wire
    #[serde(default, skip_serializing)]
    pub is_deleted: bool,
}

impl Note {
    /// Create a new note with the given title and content
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: NoteId::new(),
            title: title.into(),
            content: content.into(),
            color: NoteColor::default(),
            is_pinned: false,
            is_archived: false,
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Pending,
            is_deleted: false,
        }
    }

    /// Advance `updated_at` for a local mutation
    ///
    /// Clamped to at least one past the previous value so the timestamp
    /// strictly increases even when two edits land in the same millisecond.
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at + 1);
        self.sync_status = SyncStatus::Pending;
    }

    /// Check whether the note is empty (whitespace-only title and content)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }
}
