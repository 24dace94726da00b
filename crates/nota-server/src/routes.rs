use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::IntervalStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use nota_core::models::{now_ms, Note, NoteEvent, NoteId, NotePatch, SyncAction};

use crate::auth::{extract_bearer_token, AuthenticatedUser, TokenVerifier};
use crate::broadcast::{publish_best_effort, ChangeChannel};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::NoteStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: Arc<TokenVerifier>,
    store: Arc<dyn NoteStore>,
    channel: Arc<dyn ChangeChannel>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn NoteStore>,
        channel: Arc<dyn ChangeChannel>,
    ) -> Self {
        Self {
            verifier: Arc::new(TokenVerifier::new(&config.jwt_secret)),
            config,
            store,
            channel,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", get(pull_notes).post(apply_mutations))
        .route("/events", get(event_stream))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_ms(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.verifier.verify(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct MutationBatch {
    actions: Vec<SyncAction>,
}

#[derive(Debug, Serialize)]
struct ActionResult {
    #[serde(rename = "type")]
    kind: &'static str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<Note>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note_id: Option<NoteId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ActionResult {
    fn ok(kind: &'static str, note: Option<Note>, note_id: Option<NoteId>) -> Self {
        Self {
            kind,
            success: true,
            note,
            note_id,
            error: None,
        }
    }

    fn failed(kind: &'static str, error: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            note: None,
            note_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct MutationResponse {
    results: Vec<ActionResult>,
    timestamp: i64,
}

/// POST /v1/sync - apply a batch of mutations, each independently
async fn apply_mutations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(batch): Json<MutationBatch>,
) -> Result<Json<MutationResponse>, AppError> {
    let mut results = Vec::with_capacity(batch.actions.len());
    let mut any_success = false;

    for action in &batch.actions {
        let result = apply_one(&state, &user.scope, action).await;
        any_success |= result.success;
        results.push(result);
    }

    let timestamp = now_ms();
    if any_success {
        publish_best_effort(
            state.channel.as_ref(),
            &user.scope,
            &NoteEvent::SyncComplete { timestamp },
        )
        .await;
    }

    tracing::info!(
        scope = %user.scope,
        actions = batch.actions.len(),
        applied = results.iter().filter(|r| r.success).count(),
        "Applied mutation batch"
    );

    Ok(Json(MutationResponse { results, timestamp }))
}

async fn apply_one(state: &AppState, scope: &str, action: &SyncAction) -> ActionResult {
    let kind = action.kind();
    let outcome = match action {
        SyncAction::Create { note, .. } => state
            .store
            .create(scope, note)
            .await
            .map(|canonical| {
                (
                    Some(NoteEvent::NoteCreated {
                        note: canonical.clone(),
                    }),
                    ActionResult::ok(kind, Some(canonical), None),
                )
            })
            .map_err(|error| error.to_string()),
        SyncAction::Update { patch, .. } => apply_patch_action(state, scope, kind, patch).await,
        SyncAction::Delete { note_id, .. } => state
            .store
            .delete(scope, note_id)
            .await
            .map_err(|error| error.to_string())
            .map(|deleted| match deleted {
                Some(_) => (
                    Some(NoteEvent::NoteDeleted { note_id: *note_id }),
                    ActionResult::ok(kind, None, Some(*note_id)),
                ),
                None => (None, ActionResult::failed(kind, "note not found")),
            }),
        SyncAction::Archive {
            note_id,
            is_archived,
            ..
        } => {
            let patch = NotePatch {
                id: *note_id,
                title: None,
                content: None,
                color: None,
                is_pinned: None,
                is_archived: Some(*is_archived),
            };
            apply_patch_action(state, scope, kind, &patch).await
        }
        SyncAction::Pin {
            note_id, is_pinned, ..
        } => {
            let patch = NotePatch {
                id: *note_id,
                title: None,
                content: None,
                color: None,
                is_pinned: Some(*is_pinned),
                is_archived: None,
            };
            apply_patch_action(state, scope, kind, &patch).await
        }
    };

    match outcome {
        Ok((event, result)) => {
            if let Some(event) = event {
                publish_best_effort(state.channel.as_ref(), scope, &event).await;
            }
            result
        }
        Err(error) => {
            tracing::warn!(scope, kind, %error, "Mutation failed");
            ActionResult::failed(kind, error)
        }
    }
}

async fn apply_patch_action(
    state: &AppState,
    scope: &str,
    kind: &'static str,
    patch: &NotePatch,
) -> Result<(Option<NoteEvent>, ActionResult), String> {
    state
        .store
        .apply_patch(scope, patch)
        .await
        .map_err(|error| error.to_string())
        .map(|updated| match updated {
            Some(note) => (
                Some(NoteEvent::NoteUpdated { note: note.clone() }),
                ActionResult::ok(kind, Some(note), None),
            ),
            None => (None, ActionResult::failed(kind, "note not found")),
        })
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PullResponse {
    notes: Vec<Note>,
    timestamp: i64,
}

/// GET /v1/sync?since=ts - notes updated strictly after the checkpoint
async fn pull_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    let notes = state
        .store
        .list_since(&user.scope, query.since)
        .await
        .map_err(|error| AppError::internal(error.to_string()))?;

    Ok(Json(PullResponse {
        notes,
        timestamp: now_ms(),
    }))
}

fn sse_event(kind: &str, payload: &serde_json::Value) -> Result<Event, Infallible> {
    Ok(Event::default().event(kind).data(payload.to_string()))
}

/// GET /v1/events - realtime event stream scoped to the caller
///
/// Sends an immediate `connected` frame, keep-alive `ping` frames on a fixed
/// interval, and forwards the scope's change events. Dropping the connection
/// tears the subscription down.
async fn event_stream(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let subscription = state
        .channel
        .subscribe(&user.scope)
        .await
        .map_err(|error| AppError::internal(error.to_string()))?;

    tracing::debug!(scope = %user.scope, "Realtime listener connected");

    let connected = stream::once(async {
        sse_event("connected", &json!({ "timestamp": now_ms() }))
    });

    let ping_interval = state.config.ping_interval;
    let pings = IntervalStream::new(tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    ))
    .map(|_| sse_event("ping", &json!({ "timestamp": now_ms() })));

    let changes = subscription.map(|event| sse_event(event.kind(), &event.payload()));

    Ok(Sse::new(connected.chain(stream::select(changes, pings))))
}
