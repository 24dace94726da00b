//! Offline synchronization
//!
//! Last-write-wins with pending awareness: unconfirmed local edits get a
//! grace window before server state may override them. The sync engine
//! drains the mutation queue and pulls server changes; the realtime listener
//! applies low-latency nudges through the same conflict resolver.
//! Correctness never depends on the realtime channel.

mod client;
mod conflict;
mod engine;
mod listener;
mod sse;

pub use client::{ClientError, HttpServerClient, PullResponse, PushOutcome, ServerClient};
pub use conflict::{
    has_changes, merge_notes, resolve, resolve_batch, BatchResolution, Resolution, Winner,
    GRACE_WINDOW_MS,
};
pub use engine::{run_scheduler, SyncEngine, SyncError, SyncReport, SyncState};
pub use listener::{
    backoff_delay, ListenerState, RealtimeListener, MAX_RECONNECT_ATTEMPTS,
    RECONNECT_DELAY_BASE_MS,
};
pub use sse::{SseFrame, SseParser};
