//! REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use super::types::{
    api_error, ApiError, CreateSessionRequest, ListSessionsResponse, PairPhoneRequest,
    PairPhoneResponse, PairingArtifactResponse, SendTextRequest, SendTextResponse,
    SessionResponse, SessionStatusResponse,
};
use crate::orchestrator::SessionManager;
use crate::session::SessionId;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

fn parse_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse().map_err(api_error)
}

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}

/// API information endpoint.
pub async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active = state.manager.count().unwrap_or(0);
    Json(serde_json::json!({
        "name": "pairgate",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "active_sessions": active,
        "max_sessions": state.manager.config().max_sessions,
    }))
}

/// List all sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<ListSessionsResponse>, ApiError> {
    let sessions = state.manager.list_sessions().await.map_err(api_error)?;
    let active = state.manager.count().map_err(api_error)?;
    let connected = state
        .manager
        .connected_session_ids()
        .map_err(api_error)?
        .len();

    Ok(Json(ListSessionsResponse {
        count: sessions.len(),
        active,
        connected,
        sessions: sessions
            .into_iter()
            .map(SessionResponse::from_session)
            .collect(),
    }))
}

/// Create a new session.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = state
        .manager
        .create_session(&req.name)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_session(session)),
    ))
}

/// Get a session with its live worker details.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    let session = state.manager.session(&id).await.map_err(api_error)?;
    let worker = state.manager.worker_info(&id).ok();

    Ok(Json(SessionResponse::from_session(session).with_worker(worker)))
}

/// Delete a session, stopping its worker first.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&session_id)?;
    state.manager.delete_session(&id).await.map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start a session. Returns before the connection is established.
pub async fn connect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<SessionStatusResponse>), ApiError> {
    let id = parse_id(&session_id)?;
    state.manager.start_session(&id).await.map_err(api_error)?;
    let status = state.manager.status(&id).await.map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SessionStatusResponse::new(id, status, "connection started")),
    ))
}

/// Stop a session's worker.
pub async fn disconnect_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    state.manager.session(&id).await.map_err(api_error)?;
    state.manager.stop_session(&id).await.map_err(api_error)?;
    let status = state.manager.status(&id).await.map_err(api_error)?;

    Ok(Json(SessionStatusResponse::new(
        id,
        status,
        "session disconnected",
    )))
}

/// Log a session out and forget its credentials.
pub async fn logout_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    state.manager.logout_session(&id).await.map_err(api_error)?;
    let status = state.manager.status(&id).await.map_err(api_error)?;

    Ok(Json(SessionStatusResponse::new(
        id,
        status,
        "session logged out",
    )))
}

/// Current pairing code of a session that is mid-pairing.
pub async fn get_pairing_artifact(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<PairingArtifactResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    let artifact = state
        .manager
        .pairing_artifact(&id)
        .await
        .map_err(api_error)?;

    Ok(Json(PairingArtifactResponse::new(id, artifact)))
}

/// Request a linking code for phone pairing.
pub async fn pair_phone(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<PairPhoneRequest>,
) -> Result<Json<PairPhoneResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    let linking_code = state
        .manager
        .pair_phone(&id, &req.phone_number)
        .await
        .map_err(api_error)?;

    Ok(Json(PairPhoneResponse {
        session_id: id,
        linking_code,
    }))
}

/// Send a text message through a connected session.
pub async fn send_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Result<Json<SendTextResponse>, ApiError> {
    let id = parse_id(&session_id)?;
    let message_id = state
        .manager
        .send_text(&id, &req.to, &req.body)
        .await
        .map_err(api_error)?;

    Ok(Json(SendTextResponse {
        session_id: id,
        message_id,
        sent_at: Utc::now(),
    }))
}
