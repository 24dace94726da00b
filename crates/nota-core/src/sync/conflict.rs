//! Conflict resolution
//!
//! Pure decision logic comparing a local note version against a
//! server-supplied version. Deterministic and total; no I/O.

use std::collections::HashMap;

use crate::models::{now_ms, Note, NoteId, SyncStatus};

/// How much newer (ms) a server copy must be to override a pending local edit
///
/// Prevents trivial clock skew or near-simultaneous edits from discarding an
/// in-progress local edit, while still letting a clearly-later edit from
/// another device win.
pub const GRACE_WINDOW_MS: i64 = 30_000;

/// Which side's version is authoritative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Server,
}

/// Outcome of resolving one (local, server) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub winner: Winner,
    /// True when a pending local edit was overridden by a meaningfully newer
    /// server copy; informational only, the override still happens
    pub conflict: bool,
}

/// Decide which version of a note survives
pub fn resolve(local: Option<&Note>, server: &Note) -> Resolution {
    let Some(local) = local else {
        return Resolution {
            winner: Winner::Server,
            conflict: false,
        };
    };

    if local.sync_status == SyncStatus::Pending {
        // An unconfirmed local edit exists. Accept the server copy only when
        // it is past the grace window, which means another device kept
        // editing while this one was offline.
        if server.updated_at > local.updated_at + GRACE_WINDOW_MS {
            return Resolution {
                winner: Winner::Server,
                conflict: true,
            };
        }
        return Resolution {
            winner: Winner::Local,
            conflict: false,
        };
    }

    // Both synced: straight timestamp comparison, equal prefers local
    // (a no-op in practice since the copies would be identical).
    if server.updated_at > local.updated_at {
        Resolution {
            winner: Winner::Server,
            conflict: false,
        }
    } else {
        Resolution {
            winner: Winner::Local,
            conflict: false,
        }
    }
}

/// Result of resolving a batch of server notes against local state
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResolution {
    /// Server copies to apply locally (includes flagged conflicts)
    pub to_apply: Vec<Note>,
    /// Flagged (local, server) pairs, for user-visible notification
    pub conflicts: Vec<(Note, Note)>,
}

/// Resolve a batch of server notes, reporting applies and flagged conflicts
/// separately
pub fn resolve_batch(locals: &HashMap<NoteId, Note>, server_notes: &[Note]) -> BatchResolution {
    let mut result = BatchResolution::default();

    for server_note in server_notes {
        let local = locals.get(&server_note.id);
        let resolution = resolve(local, server_note);

        if resolution.winner == Winner::Server {
            result.to_apply.push(server_note.clone());
        }
        if resolution.conflict {
            if let Some(local) = local {
                result.conflicts.push((local.clone(), server_note.clone()));
            }
        }
    }

    result
}

/// Check whether two notes differ in any user-meaningful field
#[must_use]
pub fn has_changes(a: &Note, b: &Note) -> bool {
    a.title != b.title
        || a.content != b.content
        || a.color != b.color
        || a.is_pinned != b.is_pinned
        || a.is_archived != b.is_archived
}

/// Merge two versions of a note as a manual resolution aid
///
/// Server content wins, the pin flag is OR-merged to keep either device's
/// pin, and the result is stamped pending so it pushes on the next cycle.
#[must_use]
pub fn merge_notes(local: &Note, server: &Note) -> Note {
    let mut merged = server.clone();
    merged.is_pinned = local.is_pinned || server.is_pinned;
    merged.updated_at = now_ms().max(local.updated_at.max(server.updated_at) + 1);
    merged.sync_status = SyncStatus::Pending;
    merged
}
