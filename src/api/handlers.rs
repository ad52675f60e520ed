//! HTTP API handlers

use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::api::server::AppState;
use crate::catalog::{BoardId, UserId};
use crate::error::PlaybackError;
use crate::session::{PlayRequest, PlaybackState, PlaybackStatus, SeekRequest};

/// Header carrying the authenticated user id, set by the upstream proxy
pub const USER_ID_HEADER: &str = "x-user-id";

/// API response wrapper
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Error half of every handler
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Playback(PlaybackError),
}

impl From<PlaybackError> for ApiError {
    fn from(e: PlaybackError) -> Self {
        ApiError::Playback(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Playback(e) => match e {
                PlaybackError::NotFound(_) => StatusCode::NOT_FOUND,
                PlaybackError::Forbidden(_) => StatusCode::FORBIDDEN,
                PlaybackError::Conflict(_) => StatusCode::CONFLICT,
                PlaybackError::BadRequest(_) => StatusCode::BAD_REQUEST,
                PlaybackError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                PlaybackError::BadGateway(_) => StatusCode::BAD_GATEWAY,
                PlaybackError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Unauthorized => "Missing or invalid user id".to_string(),
            ApiError::Playback(e) => {
                debug!(kind = e.kind(), status = status.as_u16(), "Request failed: {}", e);
                e.to_string()
            }
        };
        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(Caller)
            .ok_or(ApiError::Unauthorized)
    }
}

type StateResult = Result<Json<ApiResponse<PlaybackState>>, ApiError>;

/// Service status
#[derive(serde::Serialize)]
pub struct SystemStatus {
    pub uptime_seconds: u64,
    pub sessions: Vec<SessionSummary>,
}

/// Per-board session counters
#[derive(serde::Serialize)]
pub struct SessionSummary {
    pub board_id: BoardId,
    pub status: PlaybackStatus,
    pub track_title: Option<String>,
    pub streaming: bool,
    pub queue_fill: f32,
    pub frames_pushed: u64,
    pub frames_dropped: u64,
}

/// Get service status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let registry = state.playback.sessions();
    let sessions = registry
        .board_ids()
        .into_iter()
        .filter_map(|id| registry.get(id))
        .map(|session| SessionSummary {
            board_id: session.board_id(),
            status: session.status(),
            track_title: session.producer().track_info().map(|info| info.title),
            streaming: session.is_streaming(),
            queue_fill: session.frames().fill_level(),
            frames_pushed: session.frames().pushed_count(),
            frames_dropped: session.frames().dropped_count(),
        })
        .collect();

    let status = SystemStatus {
        uptime_seconds: state.started.elapsed().as_secs(),
        sessions,
    };

    Json(ApiResponse::ok(status))
}

/// Get a board's playback state
pub async fn get_playback(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
) -> StateResult {
    let playback = state.playback.get_state(user, board_id)?;
    Ok(Json(ApiResponse::ok(playback)))
}

/// Start playback. The body is optional.
pub async fn play(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
    body: Bytes,
) -> StateResult {
    let request = if body.iter().all(|b| b.is_ascii_whitespace()) {
        PlayRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| PlaybackError::BadRequest(format!("Invalid play request: {}", e)))?
    };
    let playback = state.playback.play(user, board_id, request).await?;
    Ok(Json(ApiResponse::ok(playback)))
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
) -> StateResult {
    let playback = state.playback.pause(user, board_id).await?;
    Ok(Json(ApiResponse::ok(playback)))
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
) -> StateResult {
    let playback = state.playback.resume(user, board_id).await?;
    Ok(Json(ApiResponse::ok(playback)))
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
) -> StateResult {
    let playback = state.playback.stop(user, board_id).await?;
    Ok(Json(ApiResponse::ok(playback)))
}

pub async fn seek(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
    body: Bytes,
) -> StateResult {
    let request: SeekRequest = serde_json::from_slice(&body)
        .map_err(|e| PlaybackError::BadRequest(format!("Invalid seek request: {}", e)))?;
    let playback = state.playback.seek(user, board_id, request).await?;
    Ok(Json(ApiResponse::ok(playback)))
}

/// Live compressed audio of a board
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(board_id): Path<BoardId>,
) -> Result<Response, ApiError> {
    let audio = state.playback.stream(user, board_id).await?;
    let content_type = HeaderValue::from_str(audio.content_type())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        ],
        Body::from_stream(audio),
    )
        .into_response())
}
