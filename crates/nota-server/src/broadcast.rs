//! Change notification fan-out
//!
//! Delivers "something changed" events to all live listeners for a scope
//! (one user's device group). Two implementations behind one interface,
//! selected by configuration: an in-process registry for single-instance
//! deployments, and a Redis pub/sub channel that survives process and
//! instance boundaries.
//!
//! Delivery is at-least-once with per-scope FIFO only, and nothing is
//! persisted: a listener that is not connected never sees the event.
//! Durability of missed changes belongs to the sync engine's pull phase;
//! this channel is purely a low-latency nudge.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;

use nota_core::models::NoteEvent;

/// Buffered events per scope before slow subscribers start losing them
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Live subscription to one scope's events
pub type EventStream = Pin<Box<dyn Stream<Item = NoteEvent> + Send>>;

/// Fan-out interface for change events
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    /// Publish an event to every listener currently subscribed to the scope
    async fn publish(&self, scope: &str, event: &NoteEvent) -> Result<(), ChannelError>;

    /// Open a live subscription; dropping the stream unsubscribes
    async fn subscribe(&self, scope: &str) -> Result<EventStream, ChannelError>;
}

/// Publish without letting channel failures reach the mutating request
pub async fn publish_best_effort(channel: &dyn ChangeChannel, scope: &str, event: &NoteEvent) {
    if let Err(error) = channel.publish(scope, event).await {
        tracing::warn!(%error, scope, kind = event.kind(), "Failed to broadcast event");
    }
}

/// In-process fan-out registry
///
/// A shared map of scope to broadcast sender. Works for a single server
/// instance only; replicas behind a load balancer need [`RedisChannel`].
#[derive(Default)]
pub struct InProcessChannel {
    scopes: Mutex<HashMap<String, broadcast::Sender<NoteEvent>>>,
}

impl InProcessChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scopes with a live sender (test visibility)
    #[cfg(test)]
    async fn scope_count(&self) -> usize {
        self.scopes.lock().await.len()
    }
}

#[async_trait]
impl ChangeChannel for InProcessChannel {
    async fn publish(&self, scope: &str, event: &NoteEvent) -> Result<(), ChannelError> {
        let mut scopes = self.scopes.lock().await;
        let Some(sender) = scopes.get(scope) else {
            return Ok(()); // nobody listening
        };

        if sender.receiver_count() > 0 {
            // Send only fails when every receiver is gone; a lagged receiver
            // misses events and catches up via the pull phase.
            sender.send(event.clone()).ok();
            return Ok(());
        }

        // Last subscriber went away; prune the sender.
        scopes.remove(scope);
        Ok(())
    }

    async fn subscribe(&self, scope: &str) -> Result<EventStream, ChannelError> {
        let mut scopes = self.scopes.lock().await;
        let sender = scopes
            .entry(scope.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);

        let stream = BroadcastStream::new(sender.subscribe()).filter_map(|item| async { item.ok() });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    data: serde_json::Value,
}

/// Redis pub/sub fan-out, shared across server instances
///
/// Publishing uses one process-wide managed connection, safe for concurrent
/// calls. Each subscriber gets its own dedicated connection because
/// subscribing changes connection-wide state that must not leak between
/// listeners.
pub struct RedisChannel {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisChannel {
    /// Connect to the broker at the given URL
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        Ok(Self { client, publisher })
    }

    fn channel_key(scope: &str) -> String {
        format!("scope:{scope}:updates")
    }
}

#[async_trait]
impl ChangeChannel for RedisChannel {
    async fn publish(&self, scope: &str, event: &NoteEvent) -> Result<(), ChannelError> {
        let envelope = Envelope {
            event: event.kind().to_string(),
            data: event.payload(),
        };
        let message = serde_json::to_string(&envelope)?;

        let mut publisher = self.publisher.clone();
        redis::AsyncCommands::publish::<_, _, ()>(
            &mut publisher,
            Self::channel_key(scope),
            message,
        )
        .await?;
        Ok(())
    }

    async fn subscribe(&self, scope: &str) -> Result<EventStream, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_key(scope)).await?;

        let stream = pubsub.into_on_message().filter_map(|message| async move {
            let payload: String = message.get_payload().ok()?;
            let envelope: Envelope = match serde_json::from_str(&payload) {
                Ok(envelope) => envelope,
                Err(error) => {
                    tracing::warn!(%error, "Malformed broker message dropped");
                    return None;
                }
            };
            NoteEvent::from_frame(&envelope.event, &envelope.data.to_string())
                .ok()
                .flatten()
        });
        Ok(Box::pin(stream))
    }
}
