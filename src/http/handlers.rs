use super::state::AppState;
use crate::command::{Command, DeviceRef};
use crate::status::SessionStatus;
use crate::storage::is_plain_name;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRecordingRequest {
    pub device: Option<DeviceRef>,

    /// Recording length in minutes (worker default when absent)
    pub duration: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SessionStatus,

    /// The heartbeat is too old; the worker may be dead
    pub stale: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn reply(code: StatusCode, success: bool, message: impl Into<String>) -> axum::response::Response {
    (
        code,
        Json(CommandResponse {
            success,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Publish without letting a slow transport hold up the request
async fn send(state: &AppState, command: Command) -> Result<(), String> {
    match tokio::time::timeout(state.publish_timeout, state.commands.publish(&command)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err("timed out".to_string()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
pub async fn start_recording(
    State(state): State<AppState>,
    Json(req): Json<StartRecordingRequest>,
) -> impl IntoResponse {
    let status = match state.status.read().await {
        Ok(status) => status,
        Err(e) => {
            error!("Failed to read worker status: {:#}", e);
            return reply(StatusCode::SERVICE_UNAVAILABLE, false, "worker status unavailable");
        }
    };

    if status.is_stale(Utc::now(), state.stale_after) {
        return reply(StatusCode::SERVICE_UNAVAILABLE, false, "worker is offline");
    }
    if status.recording {
        return reply(StatusCode::CONFLICT, false, "already recording");
    }

    let Some(device) = req.device else {
        return reply(StatusCode::BAD_REQUEST, false, "no device selected");
    };

    info!("Requesting recording from {} ({})", device.mac, device.name);

    let duration = req.duration;
    if let Err(e) = send(&state, Command::start(device, duration)).await {
        error!("Failed to send start command: {}", e);
        return reply(StatusCode::SERVICE_UNAVAILABLE, false, "failed to send command");
    }

    let message = match duration {
        Some(minutes) => format!("recording started for {} minutes", minutes),
        None => "recording started".to_string(),
    };
    reply(StatusCode::ACCEPTED, true, message)
}

/// POST /recording/stop
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    match state.status.read().await {
        Ok(status) if status.recording => {}
        Ok(_) => return reply(StatusCode::CONFLICT, false, "not recording"),
        Err(e) => {
            error!("Failed to read worker status: {:#}", e);
            return reply(StatusCode::SERVICE_UNAVAILABLE, false, "worker status unavailable");
        }
    }

    if let Err(e) = send(&state, Command::stop()).await {
        error!("Failed to send stop command: {}", e);
        return reply(StatusCode::SERVICE_UNAVAILABLE, false, "failed to send command");
    }

    reply(StatusCode::ACCEPTED, true, "recording stopping")
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let response = match state.status.read().await {
        Ok(status) => StatusResponse {
            stale: status.is_stale(Utc::now(), state.stale_after),
            status,
        },
        Err(e) => {
            warn!("Status unavailable: {:#}", e);
            StatusResponse {
                status: SessionStatus::default(),
                stale: true,
            }
        }
    };
    Json(response)
}

/// GET /events
/// Server-sent `status` and `audio_level` events
pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let changes = match state.status.subscribe_changes().await {
        Ok(changes) => changes,
        Err(e) => {
            error!("Failed to subscribe to status changes: {:#}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "status updates unavailable".to_string(),
                }),
            )
                .into_response();
        }
    };

    let levels = match state.levels.subscribe_levels().await {
        Ok(levels) => levels,
        Err(e) => {
            warn!("Audio levels unavailable: {:#}", e);
            stream::empty().boxed()
        }
    };

    let store = state.status.clone();
    let status_events = changes.filter_map(move |_| {
        let store = store.clone();
        async move {
            let status = store.read().await.ok()?;
            Event::default().event("status").json_data(status).ok()
        }
    });
    let level_events =
        levels.filter_map(|sample| async move { Event::default().event("audio_level").json_data(sample).ok() });

    let merged: BoxStream<'static, Result<Event, Infallible>> =
        stream::select(status_events, level_events).map(Ok).boxed();

    Sse::new(merged).keep_alive(KeepAlive::default()).into_response()
}

/// GET /recordings
pub async fn list_recordings(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.list().await {
        Ok(files) => (StatusCode::OK, Json(files)).into_response(),
        Err(e) => {
            error!("Failed to list recordings: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to list recordings".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// DELETE /recordings/:name
pub async fn delete_recording(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !is_plain_name(&name) {
        return reply(StatusCode::BAD_REQUEST, false, "invalid file name");
    }
    let is_file = tokio::fs::metadata(state.storage.durable_path(&name))
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return reply(StatusCode::NOT_FOUND, false, format!("{} not found", name));
    }

    match state.storage.delete(&name).await {
        Ok(()) => reply(StatusCode::OK, true, format!("{} deleted", name)),
        Err(e) => {
            error!("Failed to delete {}: {:#}", name, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, false, "delete failed")
        }
    }
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
