//! Realtime client listener
//!
//! Maintains a persistent connection to the server's event stream, applies
//! incoming events through the conflict resolver, and self-heals with
//! exponential backoff. The listener is a low-latency nudge only; the sync
//! engine's pull phase covers anything missed while disconnected.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch, Notify};

use crate::db::ReplicaStore;
use crate::models::{now_ms, NoteEvent, SyncStatus};

use super::conflict::{has_changes, resolve, Winner};
use super::sse::SseParser;

/// Consecutive failed reconnects before the listener gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Base reconnect delay, doubled per consecutive failure
pub const RECONNECT_DELAY_BASE_MS: u64 = 1_000;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Too many consecutive failures; stays down until an external trigger
    /// calls `reset_attempts`
    GaveUp,
}

/// Backoff delay before reconnect attempt number `attempt` (1-based)
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis(RECONNECT_DELAY_BASE_MS.saturating_mul(1 << exponent))
}

/// Subscribes to the realtime event stream and applies changes locally
pub struct RealtimeListener<S> {
    store: Arc<S>,
    events_url: String,
    token: String,
    client: reqwest::Client,
    state_tx: watch::Sender<ListenerState>,
    attempts: AtomicU32,
    last_event_at: AtomicI64,
    resume: Notify,
    wake: mpsc::Sender<()>,
}

impl<S> RealtimeListener<S>
where
    S: ReplicaStore,
{
    /// Create a listener for the given event stream URL
    ///
    /// `wake` is signalled when the server reports `sync_complete`, nudging
    /// the sync engine to pull sooner than its next timer tick.
    pub fn new(
        store: Arc<S>,
        events_url: impl Into<String>,
        token: impl Into<String>,
        wake: mpsc::Sender<()>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Disconnected);
        Self {
            store,
            events_url: events_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
            state_tx,
            attempts: AtomicU32::new(0),
            last_event_at: AtomicI64::new(0),
            resume: Notify::new(),
            wake,
        }
    }

    /// Subscribe to connection state transitions
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    /// Reset the failure counter and retry (e.g. the device came back online)
    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::SeqCst);
        self.resume.notify_one();
    }

    /// When the last event (including pings) was seen, for staleness checks
    pub fn last_event_at(&self) -> Option<i64> {
        match self.last_event_at.load(Ordering::SeqCst) {
            0 => None,
            at => Some(at),
        }
    }

    /// Run the listener until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    // Clean shutdown requested while streaming.
                    break;
                }
                Err(error) => {
                    let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(%error, attempts, "Event stream lost");

                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        self.state_tx.send_replace(ListenerState::GaveUp);
                        tracing::warn!("Giving up on realtime events until externally resumed");
                        tokio::select! {
                            () = self.resume.notified() => {}
                            _ = shutdown.changed() => {}
                        }
                        continue;
                    }

                    self.state_tx.send_replace(ListenerState::Reconnecting);
                    let delay = backoff_delay(attempts);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        self.state_tx.send_replace(ListenerState::Disconnected);
    }

    async fn connect_and_stream(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        self.state_tx.send_replace(ListenerState::Connecting);

        let response = self
            .client
            .get(&self.events_url)
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        self.state_tx.send_replace(ListenerState::Connected);
        self.attempts.store(0, Ordering::SeqCst);

        let mut parser = SseParser::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = shutdown.changed() => return Ok(()),
            };

            let Some(chunk) = chunk else {
                // Server closed the stream; treat as a connection failure so
                // the backoff loop reconnects.
                return Err(ConnectionError::Closed);
            };

            for frame in parser.push(&chunk?) {
                self.last_event_at.store(now_ms(), Ordering::SeqCst);
                match NoteEvent::from_frame(&frame.event, &frame.data) {
                    Ok(Some(event)) => {
                        if let Err(error) = self.apply_event(&event).await {
                            tracing::warn!(%error, kind = event.kind(), "Failed to apply event");
                        }
                    }
                    Ok(None) => {} // connected / ping / unknown
                    Err(error) => {
                        tracing::warn!(%error, kind = %frame.event, "Malformed event payload");
                    }
                }
            }
        }
    }

    /// Apply one received event to the local replica
    pub async fn apply_event(&self, event: &NoteEvent) -> crate::Result<()> {
        match event {
            NoteEvent::NoteCreated { note } | NoteEvent::NoteUpdated { note } => {
                let local = self.store.get_note_any(&note.id).await?;
                let resolution = resolve(local.as_ref(), note);
                if resolution.winner == Winner::Server {
                    self.store.apply_server_note(note).await?;
                    if let Some(local) = &local {
                        if resolution.conflict {
                            self.store
                                .record_conflict(&local.id, local.updated_at, note.updated_at)
                                .await?;
                        }
                        if has_changes(local, note) {
                            tracing::info!(note = %note.id, "Note updated from another device");
                        }
                    }
                }
            }
            NoteEvent::NoteDeleted { note_id } => {
                let local = self.store.get_note_any(note_id).await?;
                let pending = local
                    .as_ref()
                    .is_some_and(|note| note.sync_status == SyncStatus::Pending);
                if pending {
                    // A pending local edit implies intent to keep the note;
                    // the next push cycle settles it.
                    tracing::debug!(note = %note_id, "Ignoring remote delete of pending note");
                } else if local.is_some() {
                    self.store.remove_note(note_id).await?;
                }
            }
            NoteEvent::SyncComplete { .. } => {
                // Nudge the engine to pull sooner; dropped if one is queued.
                self.wake.try_send(()).ok();
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Stream closed by server")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlReplicaStore};
    use crate::models::{Note, NoteId};
    use crate::sync::GRACE_WINDOW_MS;
    use pretty_assertions::assert_eq;

    async fn setup() -> (
        Database,
        Arc<LibSqlReplicaStore>,
        RealtimeListener<LibSqlReplicaStore>,
        mpsc::Receiver<()>,
    ) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(LibSqlReplicaStore::new(db.connection().clone()));
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let listener = RealtimeListener::new(
            store.clone(),
            "http://localhost:0/v1/events",
            "token",
            wake_tx,
        );
        (db, store, listener, wake_rx)
    }

    fn synced(note: &Note, updated_at: i64) -> Note {
        let mut copy = note.clone();
        copy.updated_at = updated_at;
        copy.sync_status = SyncStatus::Synced;
        copy
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_note_adopted_as_synced() {
        let (_db, store, listener, _wake) = setup().await;

        let mut note = Note::new("new", "from another device");
        note.sync_status = SyncStatus::Synced;
        listener
            .apply_event(&NoteEvent::NoteCreated { note: note.clone() })
            .await
            .unwrap();

        let local = store.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(local.content, "from another device");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_resolved_through_grace_window() {
        let (_db, store, listener, _wake) = setup().await;

        let local = store.upsert_note(Note::new("mine", "editing")).await.unwrap();

        // Within the grace window: pending local edit survives.
        let near = synced(&local, local.updated_at + 5_000);
        listener
            .apply_event(&NoteEvent::NoteUpdated { note: near })
            .await
            .unwrap();
        let kept = store.get_note(&local.id).await.unwrap().unwrap();
        assert_eq!(kept.content, "editing");
        assert_eq!(kept.sync_status, SyncStatus::Pending);

        // Past the grace window: server wins and the conflict is logged.
        let mut far = synced(&local, local.updated_at + GRACE_WINDOW_MS + 1);
        far.content = "newer elsewhere".to_string();
        listener
            .apply_event(&NoteEvent::NoteUpdated { note: far })
            .await
            .unwrap();
        let replaced = store.get_note(&local.id).await.unwrap().unwrap();
        assert_eq!(replaced.content, "newer elsewhere");
        assert_eq!(replaced.sync_status, SyncStatus::Synced);
        assert_eq!(store.conflicts(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_ignored_while_pending() {
        let (_db, store, listener, _wake) = setup().await;

        // Queued local delete: the note is soft-deleted and pending.
        let note = store.upsert_note(Note::new("keep", "")).await.unwrap();
        store.soft_delete(&note.id).await.unwrap();

        listener
            .apply_event(&NoteEvent::NoteDeleted { note_id: note.id })
            .await
            .unwrap();

        // Still present for the push cycle to settle.
        assert!(store.get_note_any(&note.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_applied_when_synced() {
        let (_db, store, listener, _wake) = setup().await;

        let mut note = Note::new("gone", "");
        note.sync_status = SyncStatus::Synced;
        store.apply_server_note(&note).await.unwrap();

        listener
            .apply_event(&NoteEvent::NoteDeleted { note_id: note.id })
            .await
            .unwrap();

        assert!(store.get_note_any(&note.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_of_unknown_note_is_noop() {
        let (_db, _store, listener, _wake) = setup().await;
        listener
            .apply_event(&NoteEvent::NoteDeleted {
                note_id: NoteId::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_complete_wakes_engine() {
        let (_db, _store, listener, mut wake) = setup().await;

        listener
            .apply_event(&NoteEvent::SyncComplete { timestamp: 1 })
            .await
            .unwrap();

        assert!(wake.try_recv().is_ok());
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(10), Duration::from_millis(512_000));
    }
}
