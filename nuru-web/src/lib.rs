//! Nuru Web - HTTP surface for torrent video streaming

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! JSON API for session management, byte-range streaming of session files
//! and a WebSocket push channel carrying progress and lifecycle events.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ApiError;
pub use server::{
    AppState, RESTART_EXIT_CODE, ServerExit, ServerLifecycle, build_router, run_server,
    shutdown_signal,
};
