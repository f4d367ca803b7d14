//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use nuru_core::engine::SimulatedEngine;
use nuru_core::sampler::Sampler;
use nuru_core::storage::FsArtifactStore;
use nuru_core::{EventBus, NuruConfig, SessionManager};
use nuru_web::{AppState, run_server, shutdown_signal};
use tokio::net::TcpListener;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Serve(ServeArgs),
    /// Empty the download root and exit
    Sweep {
        /// Download root to empty; defaults to the configured one
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

/// Flags for `serve`; each overrides the matching `NURU_*` variable.
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long)]
    host: Option<String>,
    /// Port to bind to
    #[arg(short, long)]
    port: Option<u16>,
    /// Where session artifacts are written
    #[arg(long)]
    download_dir: Option<PathBuf>,
    /// Directory served at `/` (the player page)
    #[arg(long)]
    static_dir: Option<PathBuf>,
    /// Simulated download rate in bytes per second
    #[arg(long)]
    simulated_speed: Option<u64>,
    /// Seed for reproducible simulated swarms
    #[arg(long)]
    seed: Option<u64>,
}

impl ServeArgs {
    fn apply(self, config: &mut NuruConfig) {
        if let Some(host) = self.host {
            config.server.bind_address = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.download_dir {
            config.storage.download_root = dir;
        }
        if let Some(dir) = self.static_dir {
            config.server.static_dir = Some(dir);
        }
        if let Some(speed) = self.simulated_speed {
            config.simulation.download_speed = speed;
        }
        if let Some(seed) = self.seed {
            config.simulation.deterministic_seed = Some(seed);
        }
    }
}

/// Handle the CLI command, returning the process exit code.
///
/// # Errors
///
/// - `anyhow::Error` - Configuration, bind or I/O failure
pub async fn handle_command(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Serve(args) => serve(args).await,
        Commands::Sweep { download_dir } => sweep(download_dir).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<i32> {
    let mut config = NuruConfig::from_env();
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let download_root = config.storage.download_root.clone();
    let store = Arc::new(FsArtifactStore::new(&download_root));
    store
        .sweep()
        .await
        .with_context(|| format!("failed to prepare {}", download_root.display()))?;

    let engine = Arc::new(SimulatedEngine::new(
        config.simulation.clone(),
        &download_root,
    ));
    let manager = Arc::new(SessionManager::new(
        &config,
        engine,
        store.clone(),
        EventBus::default(),
    ));
    let state = AppState::new(Arc::clone(&manager), config.streaming.clone());

    let shutdown = state.lifecycle.shutdown_token();
    let engine_listener = manager.spawn_engine_listener(shutdown.clone());
    let sampler = Sampler::new(Arc::clone(&manager), &config).spawn(shutdown.clone());

    let lifecycle = state.lifecycle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        lifecycle.request_shutdown();
    });

    let address = (config.server.bind_address.as_str(), config.server.port);
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {}:{}", address.0, address.1))?;
    tracing::info!(
        download_root = %download_root.display(),
        "Nuru torrent streamer ready"
    );

    let exit = run_server(listener, state, config.server.static_dir.clone()).await?;

    for task in [engine_listener, sampler] {
        if let Err(e) = task.await {
            tracing::warn!("Background task ended abnormally: {e}");
        }
    }
    if let Err(e) = store.sweep().await {
        tracing::warn!("Final sweep failed: {e}");
    }

    Ok(exit.exit_code())
}

async fn sweep(download_dir: Option<PathBuf>) -> anyhow::Result<i32> {
    let root = download_dir.unwrap_or_else(|| NuruConfig::from_env().storage.download_root);
    let removed = FsArtifactStore::new(&root)
        .sweep()
        .await
        .with_context(|| format!("failed to sweep {}", root.display()))?;
    println!("Removed {removed} entries from {}", root.display());
    Ok(0)
}
