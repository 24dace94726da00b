//! Sync engine
//!
//! The single point of coordination between local and server state. At most
//! one cycle runs at a time per device; a re-entrant call while one is in
//! flight is a no-op. Each cycle pushes the queued mutations in FIFO order,
//! pulls server changes since the checkpoint, resolves conflicts, and
//! advances the checkpoint to the server-reported timestamp.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::db::ReplicaStore;
use crate::models::{QueueEntry, SyncAction};

use super::client::{ClientError, ServerClient};
use super::conflict::resolve_batch;

/// Errors that abort a sync cycle
#[derive(Debug, Error)]
pub enum SyncError {
    /// Identity rejected; blocking until the caller re-authenticates
    #[error("Authorization failure: {0}")]
    Unauthorized(String),

    /// Pull phase failed; the cycle aborted with queue state preserved
    #[error("Pull failed: {0}")]
    Pull(String),

    /// Local storage failure
    #[error(transparent)]
    Store(#[from] crate::Error),
}

/// Engine lifecycle state consumed by the UI layer
///
/// Transitions are triggered only by the engine's own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Error(String),
}

/// Outcome of one completed sync cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Queue entries confirmed by the server this cycle
    pub pushed: usize,
    /// Entries that failed or were skipped as exhausted
    pub failed: usize,
    /// Server notes applied locally in the pull phase
    pub applied: usize,
    /// Flagged conflicts (auto-resolved in favor of the server)
    pub conflicts: usize,
    /// Entries still queued after the cycle
    pub pending: usize,
}

/// Orchestrates bidirectional synchronization for one replica
pub struct SyncEngine<S, C> {
    store: Arc<S>,
    client: Arc<C>,
    in_flight: AtomicBool,
    online: AtomicBool,
    state_tx: watch::Sender<SyncState>,
}

impl<S, C> SyncEngine<S, C>
where
    S: ReplicaStore,
    C: ServerClient,
{
    /// Create an engine over the given store and server client
    pub fn new(store: Arc<S>, client: Arc<C>) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            store,
            client,
            in_flight: AtomicBool::new(false),
            online: AtomicBool::new(true),
            state_tx,
        }
    }

    /// Subscribe to engine state transitions
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Record the device's connectivity; transport failures while offline do
    /// not count against the retry budget
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether the device currently believes it is online
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Run one sync cycle
    ///
    /// Returns `Ok(None)` without doing anything when a cycle is already in
    /// flight. The in-progress flag is checked before any suspension point,
    /// so two overlapping calls can never both start a cycle.
    pub async fn sync(&self) -> Result<Option<SyncReport>, SyncError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        self.state_tx.send_replace(SyncState::Syncing);
        let result = self.run_cycle().await;
        self.in_flight.store(false, Ordering::SeqCst);

        match result {
            Ok(report) => {
                self.state_tx.send_replace(SyncState::Idle);
                tracing::debug!(
                    pushed = report.pushed,
                    failed = report.failed,
                    applied = report.applied,
                    conflicts = report.conflicts,
                    pending = report.pending,
                    "Sync cycle complete"
                );
                Ok(Some(report))
            }
            Err(error) => {
                self.state_tx.send_replace(SyncState::Error(error.to_string()));
                tracing::warn!(%error, "Sync cycle failed");
                Err(error)
            }
        }
    }

    async fn run_cycle(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        self.push_phase(&mut report).await?;
        self.pull_phase(&mut report).await?;
        report.pending = self.store.pending_count().await?;
        Ok(report)
    }

    /// Drain the mutation queue against the server, FIFO
    ///
    /// Works over a snapshot taken at cycle start; entries enqueued during
    /// the cycle are picked up next cycle. Per-entry failures never cascade
    /// to other entries.
    async fn push_phase(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let queue = self.store.queue().await?;

        for entry in queue {
            if entry.is_exhausted() {
                // Left queued for manual retry, not re-attempted.
                report.failed += 1;
                continue;
            }

            match self.client.push_action(&entry.action).await {
                Ok(outcome) => {
                    self.store.drain_entry(&entry.id).await?;
                    match &entry.action {
                        SyncAction::Delete { note_id, .. } => {
                            self.store.remove_note(note_id).await?;
                        }
                        _ => {
                            if let Some(note) = &outcome.note {
                                self.store.apply_server_note(note).await?;
                            }
                        }
                    }
                    report.pushed += 1;
                }
                Err(ClientError::Unauthorized(message)) => {
                    return Err(SyncError::Unauthorized(message));
                }
                Err(error) => {
                    self.handle_push_failure(&entry, &error).await?;
                    report.failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn handle_push_failure(
        &self,
        entry: &QueueEntry,
        error: &ClientError,
    ) -> Result<(), SyncError> {
        if let ClientError::Rejected(message) = error {
            // Malformed mutation: permanently failed, left for inspection.
            self.store.exhaust_entry(&entry.id, message).await?;
            self.store.mark_note_error(&entry.action.note_id()).await?;
            tracing::warn!(
                entry = %entry.id,
                note = %entry.action.note_id(),
                action = entry.action.kind(),
                %message,
                "Mutation rejected by server, removed from automatic retry"
            );
            return Ok(());
        }

        if error.is_transient() && !self.is_online() {
            // Expected failure while offline; the retry budget is reserved
            // for failures that happen with connectivity.
            tracing::debug!(entry = %entry.id, "Push skipped while offline");
            return Ok(());
        }

        let attempts = self
            .store
            .record_entry_failure(&entry.id, &error.to_string())
            .await?;
        tracing::warn!(
            entry = %entry.id,
            action = entry.action.kind(),
            attempts,
            %error,
            "Push attempt failed"
        );

        let refreshed = QueueEntry {
            retry_count: attempts,
            ..entry.clone()
        };
        if refreshed.is_exhausted() {
            self.store.mark_note_error(&entry.action.note_id()).await?;
        }
        Ok(())
    }

    /// Fetch server changes since the checkpoint and reconcile them
    async fn pull_phase(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let since = self.store.checkpoint().await?;
        let response = self.client.pull_since(since).await.map_err(|error| match error {
            ClientError::Unauthorized(message) => SyncError::Unauthorized(message),
            other => SyncError::Pull(other.to_string()),
        })?;

        let mut locals = HashMap::new();
        for server_note in &response.notes {
            if let Some(local) = self.store.get_note_any(&server_note.id).await? {
                locals.insert(server_note.id, local);
            }
        }

        let resolution = resolve_batch(&locals, &response.notes);

        for note in &resolution.to_apply {
            self.store.apply_server_note(note).await?;
        }
        for (local, server) in &resolution.conflicts {
            self.store
                .record_conflict(&local.id, local.updated_at, server.updated_at)
                .await?;
            tracing::warn!(
                note = %local.id,
                local_updated_at = local.updated_at,
                server_updated_at = server.updated_at,
                "Conflicting edit overridden by server copy"
            );
        }

        report.applied = resolution.to_apply.len();
        report.conflicts = resolution.conflicts.len();

        // Server time, not client time: a later cycle starting from this
        // checkpoint cannot miss changes made while the query ran.
        self.store.set_checkpoint(response.timestamp).await?;
        Ok(())
    }
}

/// Drive an engine from its triggers until every wake sender is dropped
///
/// Funnels the periodic timer and external wake signals (online transitions,
/// user-initiated refresh, realtime `sync_complete` hints) into the same
/// single-flight `sync` call.
pub async fn run_scheduler<S, C>(
    engine: Arc<SyncEngine<S, C>>,
    interval: Duration,
    mut wake: mpsc::Receiver<()>,
) where
    S: ReplicaStore,
    C: ServerClient,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            message = wake.recv() => {
                if message.is_none() {
                    break;
                }
            }
        }

        if let Err(error) = engine.sync().await {
            tracing::warn!(%error, "Scheduled sync cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, LibSqlReplicaStore};
    use crate::models::{Note, NoteId, SyncStatus, MAX_PUSH_ATTEMPTS};
    use crate::sync::client::{PullResponse, PushOutcome};
    use crate::sync::GRACE_WINDOW_MS;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// What the test server should do with the next push
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum PushBehavior {
        Accept,
        FailTransient,
        Reject,
        Unauthorized,
    }

    /// In-memory stand-in for the server of record
    struct TestServer {
        notes: Mutex<HashMap<NoteId, Note>>,
        behavior: Mutex<PushBehavior>,
        pushes: Mutex<Vec<String>>,
        clock: AtomicI64,
        gate: Option<Notify>,
    }

    impl TestServer {
        fn new() -> Self {
            Self {
                notes: Mutex::new(HashMap::new()),
                behavior: Mutex::new(PushBehavior::Accept),
                pushes: Mutex::new(Vec::new()),
                clock: AtomicI64::new(2_000_000),
                gate: None,
            }
        }

        fn gated() -> Self {
            Self {
                gate: Some(Notify::new()),
                ..Self::new()
            }
        }

        fn set_behavior(&self, behavior: PushBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }

        fn now(&self) -> i64 {
            self.clock.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        }

        fn seed_note(&self, note: Note) {
            self.notes.lock().unwrap().insert(note.id, note);
        }
    }

    impl ServerClient for TestServer {
        async fn push_action(&self, action: &SyncAction) -> Result<PushOutcome, ClientError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            let behavior = *self.behavior.lock().unwrap();
            match behavior {
                PushBehavior::FailTransient => {
                    return Err(ClientError::Server("HTTP 503".to_string()))
                }
                PushBehavior::Reject => {
                    return Err(ClientError::Rejected("malformed payload (400)".to_string()))
                }
                PushBehavior::Unauthorized => {
                    return Err(ClientError::Unauthorized("token expired (401)".to_string()))
                }
                PushBehavior::Accept => {}
            }

            self.pushes.lock().unwrap().push(action.kind().to_string());
            let timestamp = self.now();
            let mut notes = self.notes.lock().unwrap();

            let note = match action {
                SyncAction::Create { note, .. } => {
                    let mut canonical = note.clone();
                    canonical.updated_at = timestamp;
                    canonical.sync_status = SyncStatus::Synced;
                    notes.insert(canonical.id, canonical.clone());
                    Some(canonical)
                }
                SyncAction::Update { patch, .. } => {
                    let existing = notes
                        .get_mut(&patch.id)
                        .ok_or_else(|| ClientError::Rejected("no such note".to_string()))?;
                    if let Some(title) = &patch.title {
                        existing.title.clone_from(title);
                    }
                    if let Some(content) = &patch.content {
                        existing.content.clone_from(content);
                    }
                    existing.updated_at = timestamp;
                    Some(existing.clone())
                }
                SyncAction::Delete { note_id, .. } => {
                    notes.remove(note_id);
                    None
                }
                SyncAction::Archive {
                    note_id,
                    is_archived,
                    ..
                } => {
                    let existing = notes
                        .get_mut(note_id)
                        .ok_or_else(|| ClientError::Rejected("no such note".to_string()))?;
                    existing.is_archived = *is_archived;
                    existing.updated_at = timestamp;
                    Some(existing.clone())
                }
                SyncAction::Pin {
                    note_id, is_pinned, ..
                } => {
                    let existing = notes
                        .get_mut(note_id)
                        .ok_or_else(|| ClientError::Rejected("no such note".to_string()))?;
                    existing.is_pinned = *is_pinned;
                    existing.updated_at = timestamp;
                    Some(existing.clone())
                }
            };

            Ok(PushOutcome {
                note,
                timestamp,
            })
        }

        async fn pull_since(&self, since: i64) -> Result<PullResponse, ClientError> {
            let notes = self
                .notes
                .lock()
                .unwrap()
                .values()
                .filter(|note| note.updated_at > since)
                .cloned()
                .collect();
            Ok(PullResponse {
                notes,
                timestamp: self.now(),
            })
        }
    }

    async fn setup(
        server: TestServer,
    ) -> (
        Database,
        Arc<LibSqlReplicaStore>,
        Arc<SyncEngine<LibSqlReplicaStore, TestServer>>,
    ) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(LibSqlReplicaStore::new(db.connection().clone()));
        let engine = Arc::new(SyncEngine::new(store.clone(), Arc::new(server)));
        (db, store, engine)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_offline_then_reconnect() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        // Created while offline: optimistic local write plus a queued create.
        let note = store.upsert_note(Note::new("Offline", "draft")).await.unwrap();
        store
            .enqueue(SyncAction::create(note.clone()))
            .await
            .unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);

        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.pending, 0);

        // Same id locally and on the server, now confirmed.
        let synced = store.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(synced.sync_status, SyncStatus::Synced);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_queue_drain_never_resubmits() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        let note = store.upsert_note(Note::new("once", "")).await.unwrap();
        store.enqueue(SyncAction::create(note)).await.unwrap();

        engine.sync().await.unwrap();
        engine.sync().await.unwrap();

        assert_eq!(engine.client.push_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_retry_excludes_exhausted_entries() {
        let (_db, store, engine) = setup(TestServer::new()).await;
        engine.client.set_behavior(PushBehavior::FailTransient);

        let note = store.upsert_note(Note::new("stuck", "")).await.unwrap();
        store
            .enqueue(SyncAction::create(note.clone()))
            .await
            .unwrap();

        for _ in 0..MAX_PUSH_ATTEMPTS {
            engine.sync().await.unwrap();
        }
        let queue = store.queue().await.unwrap();
        assert_eq!(queue[0].retry_count, MAX_PUSH_ATTEMPTS);

        // Sixth cycle: entry stays queued but is not re-attempted.
        engine.client.set_behavior(PushBehavior::Accept);
        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.pushed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(engine.client.push_count(), 0);
        assert_eq!(store.pending_count().await.unwrap(), 1);

        // The note is surfaced as requiring manual retry.
        let flagged = store.get_note(&note.id).await.unwrap().unwrap();
        assert_eq!(flagged.sync_status, SyncStatus::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_offline_failures_do_not_consume_retries() {
        let (_db, store, engine) = setup(TestServer::new()).await;
        engine.client.set_behavior(PushBehavior::FailTransient);
        engine.set_online(false);

        let note = store.upsert_note(Note::new("patient", "")).await.unwrap();
        store.enqueue(SyncAction::create(note)).await.unwrap();

        for _ in 0..3 {
            engine.sync().await.unwrap();
        }

        let queue = store.queue().await.unwrap();
        assert_eq!(queue[0].retry_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_entry_fails_permanently() {
        let (_db, store, engine) = setup(TestServer::new()).await;
        engine.client.set_behavior(PushBehavior::Reject);

        let note = store.upsert_note(Note::new("bad", "")).await.unwrap();
        store
            .enqueue(SyncAction::create(note.clone()))
            .await
            .unwrap();

        engine.sync().await.unwrap();

        let queue = store.queue().await.unwrap();
        assert!(queue[0].is_exhausted());
        assert_eq!(
            store.get_note(&note.id).await.unwrap().unwrap().sync_status,
            SyncStatus::Error
        );

        // Other entries are unaffected on the next cycle.
        engine.client.set_behavior(PushBehavior::Accept);
        let other = store.upsert_note(Note::new("good", "")).await.unwrap();
        store.enqueue(SyncAction::create(other)).await.unwrap();
        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unauthorized_aborts_cycle_preserving_queue() {
        let (_db, store, engine) = setup(TestServer::new()).await;
        engine.client.set_behavior(PushBehavior::Unauthorized);

        let note = store.upsert_note(Note::new("locked", "")).await.unwrap();
        store.enqueue(SyncAction::create(note)).await.unwrap();

        let result = engine.sync().await;
        assert!(matches!(result, Err(SyncError::Unauthorized(_))));

        let queue = store.queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].retry_count, 0);
        assert_eq!(*engine.state().borrow(), SyncState::Error(
            "Authorization failure: token expired (401)".to_string()
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_flight() {
        let (_db, store, engine) = setup(TestServer::gated()).await;

        let note = store.upsert_note(Note::new("solo", "")).await.unwrap();
        store.enqueue(SyncAction::create(note)).await.unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync().await })
        };

        // Wait for the first cycle to be parked inside its push call.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Re-entrant trigger is a no-op.
        let second = engine.sync().await.unwrap();
        assert_eq!(second, None);

        engine.client.gate.as_ref().unwrap().notify_one();
        let report = first.await.unwrap().unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(engine.client.push_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_applies_and_advances_checkpoint() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        let mut remote = Note::new("from elsewhere", "body");
        remote.sync_status = SyncStatus::Synced;
        remote.updated_at = 1_500_000;
        engine.client.seed_note(remote.clone());

        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.applied, 1);

        let local = store.get_note(&remote.id).await.unwrap().unwrap();
        assert_eq!(local.sync_status, SyncStatus::Synced);
        assert_eq!(local.title, "from elsewhere");

        let checkpoint = store.checkpoint().await.unwrap();
        assert!(checkpoint > 0);

        // Idempotent: pulling again applies nothing new and converges to the
        // same state.
        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.applied, 0);
        let again = store.get_note(&remote.id).await.unwrap().unwrap();
        assert_eq!(again, local);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_local_edit_survives_pull() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        // Device A has a pending edit; device B's change reached the server
        // 5 seconds later, well inside the grace window.
        let local = store
            .upsert_note(Note::new("mine", "local edit"))
            .await
            .unwrap();
        let mut remote = local.clone();
        remote.content = "other device".to_string();
        remote.updated_at = local.updated_at + 5_000;
        engine.client.seed_note(remote);

        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.applied, 0);
        assert_eq!(report.conflicts, 0);

        let kept = store.get_note(&local.id).await.unwrap().unwrap();
        assert_eq!(kept.content, "local edit");
        assert_eq!(kept.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_pending_edit_flagged_and_overridden() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        let local = store
            .upsert_note(Note::new("mine", "stale edit"))
            .await
            .unwrap();
        let mut remote = local.clone();
        remote.content = "much newer".to_string();
        remote.updated_at = local.updated_at + GRACE_WINDOW_MS + 1;
        engine.client.seed_note(remote);

        let report = engine.sync().await.unwrap().unwrap();
        // The queued state is empty, so the push phase did nothing; the pull
        // phase flags and applies the server copy.
        assert_eq!(report.applied, 1);
        assert_eq!(report.conflicts, 1);

        let overridden = store.get_note(&local.id).await.unwrap().unwrap();
        assert_eq!(overridden.content, "much newer");
        assert_eq!(overridden.sync_status, SyncStatus::Synced);

        let conflicts = store.conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].note_id, local.id.as_str());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirmed_delete_removes_row() {
        let (_db, store, engine) = setup(TestServer::new()).await;

        let note = store.upsert_note(Note::new("done", "")).await.unwrap();
        store.soft_delete(&note.id).await.unwrap();
        store.enqueue(SyncAction::delete(note.id)).await.unwrap();

        let report = engine.sync().await.unwrap().unwrap();
        assert_eq!(report.pushed, 1);
        assert!(store.get_note_any(&note.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_state_transitions() {
        let (_db, _store, engine) = setup(TestServer::new()).await;
        let state = engine.state();

        assert_eq!(*state.borrow(), SyncState::Idle);
        engine.sync().await.unwrap();
        assert_eq!(*state.borrow(), SyncState::Idle);
    }
}
