//! Streaming sessions: one per torrent the client has added.
//!
//! A [`Session`] is owned by the [`SessionRegistry`] and holds a shared
//! handle to the engine's torrent. [`SessionManager`] drives its lifecycle;
//! the only way out of the registry is the [`cleanup`] cascade.

pub mod cleanup;
pub mod focus;
pub mod manager;
pub mod registry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
pub use cleanup::{CleanupReport, CleanupStepError, TeardownStep};
pub use focus::FocusController;
pub use manager::{AddOutcome, SessionManager};
pub use registry::SessionRegistry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::NuruError;
use crate::engine::{EngineTorrent, SwarmStats};
use crate::health::QualityLabel;
use crate::priority::SessionPlacement;
use crate::torrent::{
    ContentLayout, FileDescriptor, FileKind, InfoHash, PieceWindow, select_primary_file,
};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    /// Cleanup cascade running; no further priority writes
    Closing,
    Closed,
}

/// Freshest figures for a session, overwritten on every sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub download_speed: u64,
    pub upload_speed: u64,
    pub progress: f64,
    pub peers: u32,
    pub seeders: u32,
    pub leechers: u32,
    pub buffer_health: f64,
    pub connection_health: f64,
    pub quality: QualityLabel,
    pub low_seeder: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            download_speed: 0,
            upload_speed: 0,
            progress: 0.0,
            peers: 0,
            seeders: 0,
            leechers: 0,
            buffer_health: 0.0,
            connection_health: 0.0,
            quality: QualityLabel::VeryLow,
            low_seeder: false,
            updated_at: None,
        }
    }
}

impl SessionMetrics {
    /// Copies swarm figures in, leaving the derived fields alone.
    pub fn apply_swarm(&mut self, stats: &SwarmStats) {
        self.download_speed = stats.download_speed;
        self.upload_speed = stats.upload_speed;
        self.progress = stats.progress.clamp(0.0, 1.0);
        self.peers = stats.peers;
        self.seeders = stats.seeders;
        self.leechers = stats.leechers;
        self.updated_at = Some(Utc::now());
    }
}

/// File listing entry as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub index: usize,
    pub name: String,
    pub length: u64,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

impl From<&FileDescriptor> for FileEntry {
    fn from(file: &FileDescriptor) -> Self {
        Self {
            index: file.index,
            name: file.name.clone(),
            length: file.length,
            kind: file.kind(),
        }
    }
}

/// One torrent being streamed.
#[derive(Clone)]
pub struct Session {
    pub info_hash: InfoHash,
    pub name: String,
    /// Piece geometry and files, once the engine has metadata
    pub layout: Option<ContentLayout>,
    /// Largest video file, if any
    pub primary_file: Option<FileDescriptor>,
    pub metrics: SessionMetrics,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub torrent: Arc<dyn EngineTorrent>,
    /// Cancelled by the cleanup cascade to end every open response
    pub streams: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("info_hash", &self.info_hash)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("primary_file", &self.primary_file)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(torrent: Arc<dyn EngineTorrent>) -> Self {
        Self {
            info_hash: torrent.info_hash(),
            name: torrent.name(),
            layout: None,
            primary_file: None,
            metrics: SessionMetrics::default(),
            state: SessionState::Active,
            created_at: Utc::now(),
            torrent,
            streams: CancellationToken::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn files(&self) -> &[FileDescriptor] {
        self.layout
            .as_ref()
            .map(|layout| layout.files.as_slice())
            .unwrap_or_default()
    }

    pub fn file(&self, index: usize) -> Option<&FileDescriptor> {
        self.files().get(index)
    }

    /// Stores metadata and picks the primary file.
    ///
    /// Returns `false` when metadata was already attached.
    pub fn attach_layout(&mut self, layout: ContentLayout) -> bool {
        if self.layout.is_some() {
            return false;
        }
        self.primary_file = select_primary_file(&layout.files).cloned();
        self.layout = Some(layout);
        true
    }

    /// Piece window of the primary file.
    pub fn primary_window(&self) -> Option<PieceWindow> {
        let layout = self.layout.as_ref()?;
        self.primary_file
            .as_ref()?
            .piece_window(layout.piece_length, layout.piece_count)
    }

    pub fn placement(&self) -> SessionPlacement {
        SessionPlacement {
            info_hash: self.info_hash,
            window: self.primary_window(),
            piece_count: self.layout.as_ref().map_or(0, |layout| layout.piece_count),
        }
    }

    pub fn snapshot(&self, focused: bool) -> SessionSnapshot {
        SessionSnapshot {
            info_hash: self.info_hash,
            name: self.name.clone(),
            state: self.state,
            focused,
            ready: self.layout.is_some(),
            primary_file: self.primary_file.as_ref().map(FileEntry::from),
            files: self.files().iter().map(FileEntry::from).collect(),
            metrics: self.metrics.clone(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub info_hash: InfoHash,
    pub name: String,
    pub state: SessionState,
    pub focused: bool,
    /// Metadata resolved
    pub ready: bool,
    pub primary_file: Option<FileEntry>,
    pub files: Vec<FileEntry>,
    #[serde(flatten)]
    pub metrics: SessionMetrics,
    pub created_at: DateTime<Utc>,
}

/// Parses a client-supplied session identifier.
///
/// Anything that is not a valid hash cannot name a session, so it is
/// reported as not found rather than as bad input.
pub fn resolve_info_hash(raw: &str) -> Result<InfoHash, NuruError> {
    InfoHash::from_hex(raw).map_err(|_| NuruError::session_not_found(raw))
}
