//! Router assembly and server lifecycle
//!
//! The server owns nothing but routing: sessions live in the core
//! [`SessionManager`], byte streams in the [`StreamingService`]. Shutdown is
//! graceful; every session is torn down through the cleanup cascade before
//! in-flight connections are drained.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post};
use nuru_core::config::StreamingConfig;
use nuru_core::{SessionManager, StreamingService};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::handlers::{api, streaming, ws};

/// Process exit code asking the supervisor to start the server again.
pub const RESTART_EXIT_CODE: i32 = 75;

/// How the server loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExit {
    /// Ctrl-C or an external shutdown request
    Stopped,
    /// `POST /api/restart`
    RestartRequested,
}

impl ServerExit {
    /// Exit code the binary should terminate with.
    pub fn exit_code(self) -> i32 {
        match self {
            ServerExit::Stopped => 0,
            ServerExit::RestartRequested => RESTART_EXIT_CODE,
        }
    }
}

/// Shared shutdown switch for the server and its background tasks.
#[derive(Debug, Clone, Default)]
pub struct ServerLifecycle {
    shutdown: CancellationToken,
    restart_requested: Arc<AtomicBool>,
}

impl ServerLifecycle {
    /// Fresh lifecycle with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when the server starts shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Begins a graceful shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Begins a graceful shutdown that ends in [`ServerExit::RestartRequested`].
    pub fn request_restart(&self) {
        self.restart_requested.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn exit(&self) -> ServerExit {
        if self.restart_requested.load(Ordering::SeqCst) {
            ServerExit::RestartRequested
        } else {
            ServerExit::Stopped
        }
    }
}

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle, focus and events
    pub manager: Arc<SessionManager>,
    /// Byte-range streams over session files
    pub streaming: StreamingService,
    /// Shutdown and restart switch
    pub lifecycle: ServerLifecycle,
    /// When the server was built, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Builds state around a session manager.
    pub fn new(manager: Arc<SessionManager>, streaming: StreamingConfig) -> Self {
        let streaming = StreamingService::new(Arc::clone(manager.registry()), streaming);
        Self {
            manager,
            streaming,
            lifecycle: ServerLifecycle::new(),
            started_at: Instant::now(),
        }
    }
}

/// Builds the application router.
///
/// With `static_dir` set, unmatched paths fall through to the files in it,
/// so `/` serves the bundled player page.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/api/torrent", post(api::add_torrent))
        .route("/api/torrents", get(api::list_torrents))
        .route("/api/torrent/{info_hash}", delete(api::remove_torrent))
        .route("/api/torrent/{info_hash}/files", get(api::list_files))
        .route("/api/playing/stop", post(api::stop_playing))
        .route("/api/playing/{info_hash}", post(api::start_playing))
        .route("/api/stream/{info_hash}", get(streaming::stream_primary))
        .route(
            "/api/stream/{info_hash}/file/{file_index}",
            get(streaming::stream_file),
        )
        .route("/api/health", get(api::health))
        .route("/api/restart", post(api::restart))
        .route("/ws", get(ws::subscribe));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Serves until the lifecycle's shutdown token fires.
///
/// On shutdown every session goes through the cleanup cascade, which ends
/// its open streams, before connections are drained.
///
/// # Errors
///
/// - `io::Error` - Accept loop failed
pub async fn run_server(
    listener: TcpListener,
    state: AppState,
    static_dir: Option<PathBuf>,
) -> io::Result<ServerExit> {
    let lifecycle = state.lifecycle.clone();
    let manager = Arc::clone(&state.manager);
    let app = build_router(state, static_dir.as_deref());

    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "Nuru listening");
    }

    let shutdown = lifecycle.shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("Shutting down, removing sessions");
            let removed = manager.shutdown().await;
            tracing::info!(removed, "Sessions removed");
        })
        .await?;

    let exit = lifecycle.exit();
    tracing::info!(?exit, "Server stopped");
    Ok(exit)
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
