//! Nuru Core - session, scheduling and streaming for torrent video playback
//!
//! This crate turns an in-progress swarm download into a seekable byte
//! stream: it tracks sessions, steers the engine's piece order toward
//! whatever is being watched, estimates buffer and connection health, and
//! tears sessions down in a fixed order. The download engine itself sits
//! behind the traits in [`engine`].

pub mod config;
pub mod engine;
pub mod events;
pub mod health;
pub mod priority;
pub mod sampler;
pub mod session;
pub mod storage;
pub mod streaming;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::NuruConfig;
pub use engine::{EngineError, EngineTorrent, TorrentEngine};
pub use events::{EventBus, NuruEvent};
pub use session::{SessionManager, SessionSnapshot};
pub use streaming::{RangeError, StreamingService};
pub use torrent::{InfoHash, MagnetLocator};

use torrent::magnet::LocatorError;

/// Coarse classification used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    RangeUnsatisfiable,
    StreamFailure,
    Internal,
}

/// Core errors that can bubble up from any Nuru subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NuruError {
    #[error("torrent {info_hash} not found")]
    SessionNotFound { info_hash: String },

    #[error("file {index} not found in torrent {info_hash}")]
    FileNotFound { info_hash: InfoHash, index: usize },

    #[error("torrent {info_hash} has no playable video file")]
    NoPlayableFile { info_hash: InfoHash },

    #[error("metadata for torrent {info_hash} is not available yet")]
    MetadataPending { info_hash: InfoHash },

    #[error(transparent)]
    InvalidLocator(#[from] LocatorError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("stream failed: {reason}")]
    StreamFailure { reason: String },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl NuruError {
    /// Unknown session, keyed by whatever the client sent.
    pub fn session_not_found(info_hash: impl ToString) -> Self {
        NuruError::SessionNotFound {
            info_hash: info_hash.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NuruError::SessionNotFound { .. }
            | NuruError::FileNotFound { .. }
            | NuruError::NoPlayableFile { .. }
            | NuruError::MetadataPending { .. } => ErrorKind::NotFound,
            NuruError::InvalidLocator(_) => ErrorKind::InvalidInput,
            NuruError::Range(RangeError::Unsatisfiable { .. }) => ErrorKind::RangeUnsatisfiable,
            NuruError::Range(_) => ErrorKind::InvalidInput,
            NuruError::StreamFailure { .. } => ErrorKind::StreamFailure,
            NuruError::Engine(EngineError::FileIndexOutOfRange { .. })
            | NuruError::Engine(EngineError::MetadataPending { .. }) => ErrorKind::NotFound,
            NuruError::Engine(_) | NuruError::Io(_) | NuruError::Configuration { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            NuruError::SessionNotFound { .. } => "Torrent not found".to_string(),
            NuruError::FileNotFound { .. } => "File not found".to_string(),
            NuruError::NoPlayableFile { .. } => "No video file found".to_string(),
            NuruError::MetadataPending { .. } => "Torrent metadata not ready".to_string(),
            NuruError::InvalidLocator(e) => {
                let mut message = e.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                message
            }
            NuruError::Range(e) => format!("Invalid range: {e}"),
            NuruError::StreamFailure { .. } => "Streaming error occurred".to_string(),
            NuruError::Engine(_) => "Download engine error occurred".to_string(),
            NuruError::Io(_) => "File system error occurred".to_string(),
            NuruError::Configuration { .. } => "Configuration error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidInput | ErrorKind::RangeUnsatisfiable
        )
    }
}

pub type Result<T> = std::result::Result<T, NuruError>;
