/// API request handlers
use crate::api::models::*;
use crate::sync::{SyncCoordinator, SyncError};
use async_stream::stream;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::Stream;
use peersync_core::snapshot::{enumerate_tree, file_statuses};
use peersync_core::{ApplyEngine, ChangeJournal, EventBus, IncomingChange, PendingOutbox};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub node_id: String,
    pub root: PathBuf,
    pub journal: Arc<ChangeJournal>,
    pub outbox: Arc<PendingOutbox>,
    pub apply: Arc<ApplyEngine>,
    pub coordinator: Arc<SyncCoordinator>,
    pub events: EventBus,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        journal: Arc<ChangeJournal>,
        outbox: Arc<PendingOutbox>,
        apply: Arc<ApplyEngine>,
        coordinator: Arc<SyncCoordinator>,
        events: EventBus,
    ) -> Self {
        Self {
            node_id: apply.node_id().to_string(),
            root: apply.root().to_path_buf(),
            journal,
            outbox,
            apply,
            coordinator,
            events,
            start_time: Instant::now(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Journal records newer than `since`
pub async fn get_changes(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Response {
    let since = query.since.unwrap_or_default();
    match state.journal.query(&since).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            tracing::error!("Journal query failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Full enumeration of the watched tree
pub async fn get_full_state(State(state): State<AppState>) -> Response {
    let root = state.root.clone();
    let journal_path = state.journal.path().to_path_buf();
    match tokio::task::spawn_blocking(move || enumerate_tree(&root, Some(&journal_path))).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            tracing::error!("Tree enumeration failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Tree enumeration failed")
        }
    }
}

/// Apply one change sent by a peer or a client, then journal it
pub async fn push_change(
    State(state): State<AppState>,
    ConnectInfo(caller): ConnectInfo<SocketAddr>,
    payload: Result<Json<IncomingChange>, JsonRejection>,
) -> Response {
    let Json(incoming) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let record = match incoming.into_record(&format!("user-{}", caller.ip())) {
        Ok(record) => record,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    if let Err(e) = state.apply.apply_change(&record).await {
        tracing::error!("Error applying pushed {}: {}", record.describe(), e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    if let Err(e) = state.journal.append(&record).await {
        tracing::error!("Failed to journal pushed {}: {}", record.describe(), e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    tracing::debug!("Accepted pushed {} from {}", record.describe(), record.origin);
    Json(StatusOk::new()).into_response()
}

fn sync_error_response(error: SyncError) -> Response {
    let status = match error {
        SyncError::NoPeer => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::Push { .. } => StatusCode::BAD_GATEWAY,
    };
    error_response(status, error.to_string())
}

/// Push pending local changes to the fastest peer
pub async fn api_push(State(state): State<AppState>) -> Response {
    match state.coordinator.push_pending().await {
        Ok(summary) => Json(PushResult {
            status: "ok".to_string(),
            changes_pushed: summary.pushed,
            peer: summary.peer,
        })
        .into_response(),
        Err(e) => sync_error_response(e),
    }
}

/// Reconcile with the fastest peer's full state
pub async fn api_pull(State(state): State<AppState>) -> Response {
    match state.coordinator.pull_full_state().await {
        Ok(summary) => Json(PullResult {
            status: "ok".to_string(),
            peer: summary.peer,
            applied: summary.report.applied,
            skipped: summary.report.skipped,
            failed: summary.report.failed,
        })
        .into_response(),
        Err(e) => sync_error_response(e),
    }
}

/// Connectivity, pending changes and per-file sync state
pub async fn api_status(State(state): State<AppState>) -> Response {
    let root = state.root.clone();
    let journal_path = state.journal.path().to_path_buf();
    let outbox = state.outbox.clone();
    let files = match tokio::task::spawn_blocking(move || {
        file_statuses(&root, Some(&journal_path), &outbox)
    })
    .await
    {
        Ok(files) => files,
        Err(e) => {
            tracing::error!("File listing failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "File listing failed");
        }
    };

    let peers = state.coordinator.peers();
    Json(StatusResponse {
        node_id: state.node_id.clone(),
        connected: peers.is_connected(),
        active_peer: peers.active_peer_url(),
        pending: state
            .outbox
            .snapshot()
            .iter()
            .map(|r| r.without_content())
            .collect(),
        files,
    })
    .into_response()
}

/// Stream node events via Server-Sent Events
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().event(event.name()).data(json));
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event stream lagged, {} event(s) dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
