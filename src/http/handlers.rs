use super::state::AppState;
use crate::error::{CaptureError, RecordsError, SyncError, SyncResult};
use crate::media::TrackKind;
use crate::room::{JoinRequest, RoomHandle, SessionRoom};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddPromptRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCaptureRequest {
    /// Window length; the configured default when omitted
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub kind: TrackKind,
    pub enabled: bool,
    pub applied: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub session_code: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::Rejected(_) => StatusCode::CONFLICT,
        SyncError::Records(RecordsError::SessionNotFound(_) | RecordsError::PromptNotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        SyncError::Records(RecordsError::AnalysisExists(_) | RecordsError::SessionCompleted(_)) => {
            StatusCode::CONFLICT
        }
        SyncError::Capture(CaptureError::DeviceDenied(_)) => StatusCode::FORBIDDEN,
        SyncError::RoomClosed => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: SyncError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("Room operation failed: {}", err);
    } else {
        warn!("Room operation refused: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn respond<T: Serialize>(result: SyncResult<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => error_response(e),
    }
}

fn room_not_found(code: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Room {} not found", code),
        }),
    )
        .into_response()
}

async fn find_room(state: &AppState, code: &str) -> Result<RoomHandle, Response> {
    state.room(code).await.ok_or_else(|| room_not_found(code))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /rooms
/// Join a session's room as conductor or responder
pub async fn open_room(State(state): State<AppState>, Json(req): Json<JoinRequest>) -> Response {
    let code = req.session_code.clone();
    info!("Opening room {} for {} ({})", code, req.name, req.role.as_str());

    let Some(claim) = state.claim(&code).await else {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("Room {} is already open", code),
            }),
        )
            .into_response();
    };

    let room = match SessionRoom::open(state.deps.clone(), req).await {
        Ok(room) => room,
        Err(e) => return error_response(e),
    };

    let snapshot = room.snapshot().await;
    {
        let mut rooms = state.rooms.write().await;
        rooms.insert(code, room);
    }
    drop(claim);
    respond(snapshot)
}

/// GET /rooms/:code/state
pub async fn get_room_state(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.snapshot().await),
        Err(response) => response,
    }
}

/// GET /rooms/:code/timeline
pub async fn get_room_timeline(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.timeline().await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/prompts
pub async fn add_prompt(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<AddPromptRequest>,
) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.add_prompt(req.text).await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/advance
pub async fn advance_prompt(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.advance_prompt().await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/retreat
pub async fn retreat_prompt(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.retreat_prompt().await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/capture/start
/// Body is optional
pub async fn start_capture(
    State(state): State<AppState>,
    Path(code): Path<String>,
    req: Option<Json<StartCaptureRequest>>,
) -> Response {
    let Json(req) = req.unwrap_or_default();
    match find_room(&state, &code).await {
        Ok(room) => respond(room.begin_capture(req.duration_seconds).await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/capture/stop
pub async fn stop_capture(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(room.stop_capture().await),
        Err(response) => response,
    }
}

/// POST /rooms/:code/response
pub async fn set_response(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<ResponseRequest>,
) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => match room.set_response(req.text).await {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(e) => error_response(e),
        },
        Err(response) => response,
    }
}

/// POST /rooms/:code/media/:kind
pub async fn set_track(
    State(state): State<AppState>,
    Path((code, kind)): Path<(String, TrackKind)>,
    Json(req): Json<TrackRequest>,
) -> Response {
    match find_room(&state, &code).await {
        Ok(room) => respond(
            room.set_track_enabled(kind, req.enabled)
                .await
                .map(|applied| TrackResponse {
                    kind,
                    enabled: req.enabled,
                    applied,
                }),
        ),
        Err(response) => response,
    }
}

/// POST /rooms/:code/complete
/// Body is optional
pub async fn complete_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
    req: Option<Json<CompleteRequest>>,
) -> Response {
    let Json(req) = req.unwrap_or_default();
    match find_room(&state, &code).await {
        Ok(room) => respond(room.complete_session(req.notes).await),
        Err(response) => response,
    }
}

/// DELETE /rooms/:code
/// Leave the room and release its media
pub async fn leave_room(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    info!("Leaving room {}", code);

    let room = {
        let mut rooms = state.rooms.write().await;
        rooms.remove(&code)
    };

    match room {
        Some(room) => {
            if let Err(e) = room.leave().await {
                warn!("Room {} was already closed: {}", code, e);
            }
            (
                StatusCode::OK,
                Json(LeaveResponse {
                    session_code: code,
                    status: "left".to_string(),
                }),
            )
                .into_response()
        }
        None => room_not_found(&code),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
