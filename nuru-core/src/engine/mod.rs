//! Boundary to the peer-to-peer download engine.
//!
//! Nuru never speaks the wire protocol itself. Everything it needs from a
//! swarm client is expressed by two traits: [`TorrentEngine`] owns the set of
//! torrents and publishes [`EngineEvent`]s, and [`EngineTorrent`] is a shared
//! handle to one torrent. Piece-state probing is normalised into a single
//! `is_piece_complete` query so callers never depend on how a particular
//! engine tracks its bitfield.

#[cfg(feature = "simulation")]
pub mod simulated;

use std::io;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::torrent::{ContentLayout, InfoHash, MagnetLocator};

#[cfg(feature = "simulation")]
pub use simulated::{FailurePlan, SimulatedEngine, SimulatedTorrent};

/// Chunks of file content in ascending offset order.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Fetch priority for a piece, lowest first.
///
/// Pieces with no tier written run at the engine's own default, which sits
/// between `Suppressed` and `Normal`. `Suppressed` pieces stay eligible for
/// download; they are only fetched after everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceTier {
    Suppressed,
    Normal,
    High,
    Urgent,
}

/// Point-in-time swarm figures for one torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmStats {
    /// Overall completion ratio in `[0, 1]`
    pub progress: f64,
    /// Download throughput in bytes per second
    pub download_speed: u64,
    /// Upload throughput in bytes per second
    pub upload_speed: u64,
    /// Verified bytes on disk
    pub downloaded: u64,
    pub peers: u32,
    pub seeders: u32,
    pub leechers: u32,
}

/// Connection and discovery limits applied to a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTuning {
    /// Process-wide connection ceiling
    pub max_connections: u32,
    /// Connection ceiling for this torrent
    pub max_connections_per_torrent: u32,
    /// How long a piece request may stay outstanding
    pub piece_timeout: Duration,
    pub dht: bool,
    pub trackers: bool,
    pub local_discovery: bool,
}

/// Notifications published by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Piece table and file list became known.
    MetadataReady { info_hash: InfoHash },
    /// Fresh throughput and peer figures.
    Download {
        info_hash: InfoHash,
        stats: SwarmStats,
    },
    /// The engine gave up on something for this torrent.
    Error { info_hash: InfoHash, message: String },
}

impl EngineEvent {
    /// Torrent the event refers to.
    pub fn info_hash(&self) -> InfoHash {
        match self {
            EngineEvent::MetadataReady { info_hash }
            | EngineEvent::Download { info_hash, .. }
            | EngineEvent::Error { info_hash, .. } => *info_hash,
        }
    }
}

/// Errors surfaced by an engine implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("torrent {info_hash} is not known to the engine")]
    UnknownTorrent { info_hash: InfoHash },

    #[error("metadata for torrent {info_hash} is not available yet")]
    MetadataPending { info_hash: InfoHash },

    #[error("file index {index} out of range ({file_count} files)")]
    FileIndexOutOfRange { index: usize, file_count: usize },

    #[error("byte range {start}-{end} outside file of {file_length} bytes")]
    RangeOutOfBounds {
        start: u64,
        end: u64,
        file_length: u64,
    },

    #[error("torrent {info_hash} has been destroyed")]
    Destroyed { info_hash: InfoHash },

    #[error("engine rejected request: {reason}")]
    Rejected { reason: String },

    #[error("engine I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Shared handle to one torrent inside the engine.
///
/// Handles are reference counted; the session registry only borrows them and
/// the cleanup cascade is the one place that calls [`EngineTorrent::destroy`].
#[async_trait]
pub trait EngineTorrent: Send + Sync {
    fn info_hash(&self) -> InfoHash;

    /// Engine-reported display name.
    fn name(&self) -> String;

    /// Piece geometry and files, `None` until metadata resolves.
    fn layout(&self) -> Option<ContentLayout>;

    /// Whether `piece` has been downloaded and verified.
    fn is_piece_complete(&self, piece: u32) -> bool;

    fn swarm_stats(&self) -> SwarmStats;

    /// Writes `tier` for every piece in `pieces`.
    ///
    /// # Errors
    ///
    /// - `EngineError::MetadataPending` - No piece table yet
    /// - `EngineError::Destroyed` - Handle already torn down
    fn set_piece_priority(
        &self,
        pieces: RangeInclusive<u32>,
        tier: PieceTier,
    ) -> Result<(), EngineError>;

    /// Returns every piece in `pieces` to the engine default.
    ///
    /// # Errors
    ///
    /// - `EngineError::MetadataPending` - No piece table yet
    /// - `EngineError::Destroyed` - Handle already torn down
    fn restore_piece_priority(&self, pieces: RangeInclusive<u32>) -> Result<(), EngineError>;

    /// Replaces connection limits and discovery switches.
    ///
    /// # Errors
    ///
    /// - `EngineError::Destroyed` - Handle already torn down
    fn apply_tuning(&self, tuning: &ConnectionTuning) -> Result<(), EngineError>;

    /// Opens a stream over the inclusive byte `range` of one file.
    ///
    /// The stream yields data as pieces complete and may suspend
    /// indefinitely while the swarm catches up. Dropping it releases all
    /// engine resources held for the read.
    ///
    /// # Errors
    ///
    /// - `EngineError::MetadataPending` - File table not known yet
    /// - `EngineError::FileIndexOutOfRange` - No such file
    /// - `EngineError::RangeOutOfBounds` - Range exceeds the file
    async fn open_read_stream(
        &self,
        file_index: usize,
        range: RangeInclusive<u64>,
    ) -> Result<ByteStream, EngineError>;

    /// Directory holding this torrent's on-disk artifacts.
    fn download_dir(&self) -> PathBuf;

    /// Stops all activity for the torrent and releases its resources.
    ///
    /// # Errors
    ///
    /// - `EngineError::Io` - Engine failed to flush or close its files
    async fn destroy(&self) -> Result<(), EngineError>;
}

/// The download engine as a whole.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Starts fetching the torrent named by `locator`.
    ///
    /// Adding a torrent that is already present returns the existing handle.
    ///
    /// # Errors
    ///
    /// - `EngineError::Rejected` - Engine refused the locator
    async fn add_torrent(
        &self,
        locator: &MagnetLocator,
    ) -> Result<Arc<dyn EngineTorrent>, EngineError>;

    /// Stops and forgets a torrent.
    ///
    /// # Errors
    ///
    /// - `EngineError::UnknownTorrent` - Nothing registered under `info_hash`
    async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), EngineError>;

    /// Subscribes to engine notifications.
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
