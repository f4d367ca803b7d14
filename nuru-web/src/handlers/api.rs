//! JSON API handlers for session management

use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use nuru_core::events::{NuruEvent, ServerRestarting};
use nuru_core::session::{FileEntry, SessionSnapshot};
use serde::{Deserialize, Serialize};

use super::parse_info_hash;
use crate::error::ApiError;
use crate::server::AppState;

/// Delay between announcing a restart and starting shutdown, so the
/// announcement reaches subscribers.
const RESTART_GRACE: Duration = Duration::from_millis(250);

/// Body of `POST /api/torrent`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentRequest {
    /// Magnet URI or bare hex info hash
    #[serde(default)]
    pub magnet_link: Option<String>,
}

/// Reply to `POST /api/torrent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentResponse {
    /// Always true on 200
    pub success: bool,
    /// Session identifier
    pub info_hash: String,
    /// Human readable outcome
    pub message: String,
}

/// Reply to `GET /api/torrents`.
#[derive(Debug, Serialize)]
pub struct TorrentList {
    /// Every session, oldest first
    pub torrents: Vec<SessionSnapshot>,
    /// Number of sessions
    pub total: usize,
}

/// Reply to `GET /api/torrent/{info_hash}/files`.
#[derive(Debug, Serialize)]
pub struct FileList {
    /// Files in torrent order
    pub files: Vec<FileEntry>,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize)]
pub struct Ack {
    /// Always true on 200
    pub success: bool,
    /// Human readable outcome
    pub message: String,
}

impl Ack {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

/// Reply to `DELETE /api/torrent/{info_hash}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveResponse {
    /// Always true on 200; removal itself cannot fail
    pub success: bool,
    /// Whether every teardown step succeeded
    pub cleanup_complete: bool,
    /// One line per failed step
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Human readable outcome
    pub message: String,
}

/// Reply to `GET /api/health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `shutting-down` once shutdown began
    pub status: &'static str,
    /// Seconds since the server was built
    pub uptime_seconds: u64,
    /// Sessions in the registry
    pub active_sessions: usize,
    /// Response bodies still streaming
    pub open_streams: usize,
}

/// Adds a session for a magnet link.
///
/// # Errors
///
/// - 400 - Missing or malformed magnet link
/// - 500 - Engine refused the torrent
pub async fn add_torrent(
    State(state): State<AppState>,
    body: Result<Json<AddTorrentRequest>, JsonRejection>,
) -> Result<Json<AddTorrentResponse>, ApiError> {
    let locator = body
        .ok()
        .and_then(|Json(request)| request.magnet_link)
        .unwrap_or_default();

    let outcome = state.manager.add_session(&locator).await?;
    let message = if outcome.created {
        "Torrent added successfully"
    } else {
        "Torrent already added"
    };

    Ok(Json(AddTorrentResponse {
        success: true,
        info_hash: outcome.info_hash.to_string(),
        message: message.to_string(),
    }))
}

/// Lists every session.
pub async fn list_torrents(State(state): State<AppState>) -> Json<TorrentList> {
    let torrents = state.manager.snapshots();
    Json(TorrentList {
        total: torrents.len(),
        torrents,
    })
}

/// Lists a session's files.
///
/// # Errors
///
/// - 404 - Unknown session
pub async fn list_files(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<FileList>, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let files = state.manager.files(info_hash)?;
    Ok(Json(FileList { files }))
}

/// Marks a session as the one being watched.
///
/// # Errors
///
/// - 404 - Unknown session
pub async fn start_playing(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<Ack>, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    state.manager.set_focus(info_hash)?;
    Ok(Ack::ok("Video prioritization updated"))
}

/// Clears focus.
pub async fn stop_playing(State(state): State<AppState>) -> Json<Ack> {
    state.manager.clear_focus();
    Ack::ok("Video prioritization stopped")
}

/// Removes a session through the cleanup cascade.
///
/// # Errors
///
/// - 404 - Unknown session, or removal already running
pub async fn remove_torrent(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let report = state.manager.remove_session(info_hash).await?;

    Ok(Json(RemoveResponse {
        success: true,
        cleanup_complete: report.is_complete(),
        errors: report.errors(),
        message: "Torrent removed".to_string(),
    }))
}

/// Liveness and load figures.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.lifecycle.is_shutting_down() {
        "shutting-down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_sessions: state.manager.registry().len(),
        open_streams: state.streaming.open_streams(),
    })
}

/// Announces a restart, then shuts down with the restart exit code.
pub async fn restart(State(state): State<AppState>) -> Json<Ack> {
    let notified = state
        .manager
        .events()
        .publish(NuruEvent::ServerRestarting(ServerRestarting {
            message: "Server is restarting".to_string(),
        }));
    tracing::warn!(notified, "Restart requested");

    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_GRACE).await;
        lifecycle.request_restart();
    });

    Ack::ok("Server restarting")
}
