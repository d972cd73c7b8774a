//! HTTP/SSE surface for the Forge engine.
//!
//! Thin framing over [`forge::Engine`]: input errors map to 400/404 with
//! `{ok:false, error}`, semantic outcomes (accepted / conflicted /
//! rejected) are 200 bodies, storage failures are 500 with a generic
//! detail. The SSE stream emits an initial snapshot on connect, then a
//! snapshot-valued `state_update` event per change, with `: keepalive`
//! comments every ~15 seconds.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use forge::engine::Engine;
use forge::engine::events::EngineEvent;
use forge::error::EngineError;

/// SSE keepalive interval.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Log a line per `state_update` event until the engine is dropped.
/// Spawned by `main` when `FORGE_LOG_STATE_UPDATES` is on.
pub async fn log_state_updates(engine: Arc<Engine>) {
    let mut events = engine.subscribe();
    loop {
        match events.recv().await {
            Ok(EngineEvent::StateUpdate { state, snapshot }) => {
                info!(
                    state = %state,
                    ops = snapshot.op_count,
                    open_conflicts = snapshot.open_conflicts.len(),
                    files = snapshot.tree.len(),
                    "state update"
                );
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// JSON error envelope: `{ok:false, error}` with the mapped status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::Store { .. } => {
                error!(error = %err, "internal engine failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
            _ if err.is_not_found() => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            _ => Self::bad_request(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({"ok": false, "error": self.message}));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum router with every route of the HTTP surface.
#[must_use]
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/states", get(list_states).post(create_state))
        .route("/v1/states/{state}", get(get_state))
        .route("/v1/states/{state}/conflicts", get(state_conflicts))
        .route("/v1/states/{state}/promote", post(promote))
        .route("/v1/change-sets", get(list_change_sets).post(submit_change_set))
        .route("/v1/change-sets/{id}", get(get_change_set))
        .route("/v1/ops", post(submit_ops))
        .route("/v1/ops/{id}", get(get_op))
        .route("/v1/conflicts/{id}", get(get_conflict))
        .route("/v1/conflicts/{id}/resolve", post(resolve_conflict))
        .route("/v1/stream/states/{state}", get(stream_state))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

async fn list_states(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"states": state.engine.list_states()}))
}

#[derive(Debug, Deserialize)]
struct CreateStateRequest {
    name: String,
    #[serde(default)]
    from_state: Option<String>,
}

async fn create_state(
    State(state): State<AppState>,
    Json(req): Json<CreateStateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Duplicate names and missing parents are both 400 on this route.
    let created = state
        .engine
        .create_state(&req.name, req.from_state.as_deref())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"ok": true, "state": created})),
    ))
}

async fn get_state(
    State(state): State<AppState>,
    AxPath(name): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.engine.state_snapshot(&name)?;
    Ok(Json(snapshot))
}

async fn state_conflicts(
    State(state): State<AppState>,
    AxPath(name): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let conflicts = state.engine.list_conflicts(Some(&name))?;
    Ok(Json(json!({"conflicts": conflicts})))
}

#[derive(Debug, Deserialize)]
struct PromoteRequest {
    target_state: String,
    #[serde(default)]
    author: Option<String>,
}

async fn promote(
    State(state): State<AppState>,
    AxPath(source): AxPath<String>,
    Json(req): Json<PromoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .engine
        .promote(
            &source,
            &req.target_state,
            req.author.as_deref().unwrap_or("anonymous"),
        )
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(json!({
        "ok": outcome.ok,
        "accepted": outcome.accepted,
        "conflicts": outcome.conflicts,
        "results": outcome.results,
    })))
}

async fn submit_change_set(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    // Accept `{change_set}` or the raw change set.
    let change_set = match body {
        Value::Object(mut map) if map.contains_key("change_set") => map
            .remove("change_set")
            .unwrap_or(Value::Null),
        other => other,
    };
    let outcome = state.engine.submit(change_set)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ChangeSetQuery {
    #[serde(default)]
    state: Option<String>,
}

async fn list_change_sets(
    State(state): State<AppState>,
    Query(query): Query<ChangeSetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let change_sets = state.engine.list_change_sets(query.state.as_deref())?;
    Ok(Json(json!({"change_sets": change_sets})))
}

async fn get_change_set(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_change_set(&id)?))
}

async fn submit_ops(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    // Accept `{op}`, `{ops:[...]}`, or a raw op.
    let ops = match body {
        Value::Object(mut map) if map.contains_key("ops") => {
            match map.remove("ops").unwrap_or(Value::Null) {
                Value::Array(ops) => ops,
                _ => return Err(ApiError::bad_request("'ops' must be an array")),
            }
        }
        Value::Object(mut map) if map.contains_key("op") => {
            vec![map.remove("op").unwrap_or(Value::Null)]
        }
        other => vec![other],
    };
    let outcome = state.engine.submit_ops(ops)?;
    Ok(Json(outcome))
}

async fn get_op(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_op(&id)?))
}

async fn get_conflict(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_conflict(&id)?))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    op: Value,
}

async fn resolve_conflict(
    State(state): State<AppState>,
    AxPath(id): AxPath<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.resolve(&id, req.op)?;
    Ok(Json(json!({
        "ok": outcome.ok,
        "conflict": outcome.conflict,
        "submit_result": outcome.submit_result,
    })))
}

async fn stream_state(
    State(state): State<AppState>,
    AxPath(name): AxPath<String>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let snapshot = state.engine.state_snapshot(&name)?;
    let initial = SseEvent::default()
        .event("state_update")
        .json_data(&snapshot)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let updates = BroadcastStream::new(state.engine.subscribe()).filter_map(move |event| {
        match event {
            Ok(EngineEvent::StateUpdate {
                state: event_state,
                snapshot,
            }) if event_state.as_str() == name => SseEvent::default()
                .event("state_update")
                .json_data(&snapshot)
                .ok()
                .map(Ok),
            // Laggards skip intermediate snapshots; the next one is
            // self-contained.
            _ => None,
        }
    });

    let stream = tokio_stream::once(Ok(initial)).chain(updates);
    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}
