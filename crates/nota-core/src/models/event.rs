//! Change notification events
//!
//! Events are framed on the wire as an event name plus a JSON payload. The
//! transport-level `connected` and `ping` frames are not represented here;
//! they never carry note data.

use serde::Deserialize;
use serde_json::json;

use super::note::{Note, NoteId};

/// A change event fanned out to a scope's connected replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
    NoteCreated { note: Note },
    NoteUpdated { note: Note },
    NoteDeleted { note_id: NoteId },
    SyncComplete { timestamp: i64 },
}

#[derive(Deserialize)]
struct NotePayload {
    note: Note,
}

#[derive(Deserialize)]
struct NoteIdPayload {
    note_id: NoteId,
}

#[derive(Deserialize)]
struct TimestampPayload {
    timestamp: i64,
}

impl NoteEvent {
    /// Wire name of the event kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoteCreated { .. } => "note_created",
            Self::NoteUpdated { .. } => "note_updated",
            Self::NoteDeleted { .. } => "note_deleted",
            Self::SyncComplete { .. } => "sync_complete",
        }
    }

    /// JSON payload carried with the event
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::NoteCreated { note } | Self::NoteUpdated { note } => json!({ "note": note }),
            Self::NoteDeleted { note_id } => json!({ "note_id": note_id }),
            Self::SyncComplete { timestamp } => json!({ "timestamp": timestamp }),
        }
    }

    /// Parse an event from a received frame
    ///
    /// Returns `Ok(None)` for transport-level or unknown event kinds, which
    /// listeners ignore.
    pub fn from_frame(kind: &str, data: &str) -> serde_json::Result<Option<Self>> {
        let event = match kind {
            "note_created" => {
                let payload: NotePayload = serde_json::from_str(data)?;
                Some(Self::NoteCreated { note: payload.note })
            }
            "note_updated" => {
                let payload: NotePayload = serde_json::from_str(data)?;
                Some(Self::NoteUpdated { note: payload.note })
            }
            "note_deleted" => {
                let payload: NoteIdPayload = serde_json::from_str(data)?;
                Some(Self::NoteDeleted {
                    note_id: payload.note_id,
                })
            }
            "sync_complete" => {
                let payload: TimestampPayload = serde_json::from_str(data)?;
                Some(Self::SyncComplete {
                    timestamp: payload.timestamp,
                })
            }
            _ => None,
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_round_trip() {
        let note = Note::new("title", "content");
        let event = NoteEvent::NoteUpdated { note };

        let data = event.payload().to_string();
        let parsed = NoteEvent::from_frame(event.kind(), &data).unwrap().unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_deleted_event_carries_id_only() {
        let id = NoteId::new();
        let event = NoteEvent::NoteDeleted { note_id: id };
        assert_eq!(event.kind(), "note_deleted");

        let data = event.payload().to_string();
        match NoteEvent::from_frame("note_deleted", &data).unwrap() {
            Some(NoteEvent::NoteDeleted { note_id }) => assert_eq!(note_id, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_ignored() {
        assert_eq!(NoteEvent::from_frame("ping", "{}").unwrap(), None);
        assert_eq!(NoteEvent::from_frame("connected", "{}").unwrap(), None);
    }
}
