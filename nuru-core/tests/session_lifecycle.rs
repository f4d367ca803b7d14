//! Session lifecycle across the public core API: add, focus, stream, remove.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nuru_core::engine::simulated::{SimulatedEngine, content_bytes};
use nuru_core::engine::{EngineTorrent, PieceTier};
use nuru_core::session::TeardownStep;
use nuru_core::storage::{ArtifactError, ArtifactStore, FsArtifactStore};
use nuru_core::streaming::FileTarget;
use nuru_core::{EventBus, InfoHash, NuruConfig, NuruEvent, SessionManager, StreamingService};
use tempfile::TempDir;

const PIECE: u64 = 16 * 1024;

struct Harness {
    _dir: TempDir,
    engine: Arc<SimulatedEngine>,
    manager: Arc<SessionManager>,
    streaming: StreamingService,
}

fn harness_with_store(store: impl FnOnce(&TempDir) -> Arc<dyn ArtifactStore>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = NuruConfig::for_testing();
    let engine = Arc::new(SimulatedEngine::new(config.simulation.clone(), dir.path()));
    let manager = Arc::new(SessionManager::new(
        &config,
        engine.clone(),
        store(&dir),
        EventBus::default(),
    ));
    let streaming = StreamingService::new(Arc::clone(manager.registry()), config.streaming);

    Harness {
        _dir: dir,
        engine,
        manager,
        streaming,
    }
}

fn harness() -> Harness {
    harness_with_store(|dir| Arc::new(FsArtifactStore::new(dir.path())))
}

/// Ten pieces of video followed by two pieces of subtitles.
async fn add_show(h: &Harness, byte: u8) -> InfoHash {
    let info_hash = InfoHash::new([byte; 20]);
    h.engine.register_content(
        info_hash,
        vec![
            ("show.mp4".to_string(), 10 * PIECE),
            ("show.srt".to_string(), 2 * PIECE),
        ],
    );
    let outcome = h.manager.add_session(&info_hash.to_string()).await.unwrap();
    assert!(outcome.created);
    info_hash
}

#[tokio::test]
async fn test_focus_switch_demotes_previous_session() {
    let h = harness();
    let a = add_show(&h, 0xa1).await;
    let b = add_show(&h, 0xb2).await;
    let sim_a = h.engine.torrent(a).unwrap();
    let sim_b = h.engine.torrent(b).unwrap();

    h.manager.set_focus(a).unwrap();
    assert_eq!(sim_a.piece_tier(0), Some(PieceTier::Urgent));
    assert_eq!(sim_a.piece_tier(1), Some(PieceTier::Urgent));
    assert_eq!(sim_a.piece_tier(2), Some(PieceTier::High));
    assert_eq!(sim_a.piece_tier(9), Some(PieceTier::High));
    assert_eq!(sim_a.piece_tier(10), Some(PieceTier::Suppressed));
    assert_eq!(sim_b.piece_tier(0), Some(PieceTier::Normal));

    h.manager.set_focus(b).unwrap();
    assert_eq!(h.manager.focused(), Some(b));
    assert_eq!(sim_a.piece_tier(0), Some(PieceTier::Normal));
    assert_eq!(sim_a.piece_tier(9), Some(PieceTier::Normal));
    assert_eq!(sim_a.piece_tier(10), None);
    assert_eq!(sim_a.piece_tier(11), None);
    assert_eq!(sim_b.piece_tier(0), Some(PieceTier::Urgent));
    assert_eq!(sim_b.piece_tier(11), Some(PieceTier::Suppressed));

    h.manager.clear_focus();
    assert_eq!(h.manager.focused(), None);
    assert_eq!(sim_b.piece_tier(0), Some(PieceTier::Normal));
    assert_eq!(sim_b.piece_tier(11), None);
}

#[tokio::test]
async fn test_low_seeder_adaptation_is_idempotent() {
    let h = harness();
    let info_hash = add_show(&h, 0x10).await;
    let sim = h.engine.torrent(info_hash).unwrap();
    let (baseline, _) = sim.tuning();

    sim.set_swarm(40, 1, 39);
    let stats = sim.swarm_stats();
    h.manager.handle_progress(info_hash, &stats);
    let (once, _) = sim.tuning();
    h.manager.handle_progress(info_hash, &stats);
    let (twice, _) = sim.tuning();

    assert_ne!(once, baseline);
    assert_eq!(once, twice);
    let widened = once.unwrap();
    assert_eq!(widened.max_connections_per_torrent, 80);
    assert_eq!(widened.piece_timeout, Duration::from_secs(60));
    assert!(h.manager.session(info_hash).unwrap().metrics.low_seeder);

    sim.set_swarm(40, 3, 37);
    h.manager.handle_progress(info_hash, &sim.swarm_stats());
    assert!(!h.manager.session(info_hash).unwrap().metrics.low_seeder);
}

#[tokio::test]
async fn test_stream_then_remove() {
    let h = harness();
    let info_hash = add_show(&h, 0x20).await;
    let download_dir = h.engine.torrent(info_hash).unwrap().download_dir();
    h.manager.set_focus(info_hash).unwrap();

    let response = h
        .streaming
        .open(info_hash, FileTarget::Primary, Some("bytes=100-20099"))
        .await
        .unwrap();
    assert_eq!(response.content_length(), 20_000);
    let mut body = response.body;
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(bytes, content_bytes(100, 20_099));

    let mut events = h.manager.events().subscribe();
    let report = h.manager.remove_session(info_hash).await.unwrap();
    assert!(report.is_complete(), "{:?}", report.errors());
    assert!(report.was_focused);
    assert!(h.manager.registry().is_empty());
    assert_eq!(h.manager.focused(), None);
    assert!(!download_dir.exists());

    let removed = loop {
        match events.recv().await.unwrap() {
            NuruEvent::TorrentRemoved(removed) => break removed,
            _ => continue,
        }
    };
    assert_eq!(removed.info_hash, info_hash);
    assert!(removed.cleanup_complete);

    // A second removal finds nothing.
    assert!(h.manager.remove_session(info_hash).await.is_err());
}

struct BrokenDisk;

#[async_trait::async_trait]
impl ArtifactStore for BrokenDisk {
    async fn remove_artifacts(&self, path: &std::path::Path) -> Result<(), ArtifactError> {
        Err(ArtifactError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::other("read-only filesystem"),
        })
    }
}

#[tokio::test]
async fn test_removal_survives_artifact_failure() {
    let h = harness_with_store(|_| Arc::new(BrokenDisk));
    let info_hash = add_show(&h, 0x30).await;
    h.manager.set_focus(info_hash).unwrap();

    let report = h.manager.remove_session(info_hash).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failed_steps(), vec![TeardownStep::DeleteArtifacts]);
    assert!(!h.manager.registry().contains(&info_hash));
    assert_eq!(h.manager.focused(), None);
    assert!(h.engine.torrent(info_hash).is_none_or(|sim| sim.is_destroyed()));
}
