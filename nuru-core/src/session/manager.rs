//! Session orchestration.
//!
//! [`SessionManager`] is the single entry point the HTTP layer and the
//! background tasks use. It wires engine events into the registry, the
//! estimators and the scheduler, and runs the cleanup cascade on removal.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cleanup::{CleanupContext, CleanupReport, run_cascade};
use super::{FileEntry, FocusController, Session, SessionRegistry, SessionSnapshot};
use crate::config::NuruConfig;
use crate::engine::{EngineEvent, SwarmStats, TorrentEngine};
use crate::events::{self, EventBus, NuruEvent};
use crate::health::{BufferHealthEstimator, ConnectionHealthMonitor, classify_throughput};
use crate::priority::{LowSeederPolicy, PriorityScheduler, ScheduleReport};
use crate::storage::ArtifactStore;
use crate::torrent::{InfoHash, MagnetLocator};
use crate::{NuruError, Result};

/// Result of [`SessionManager::add_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub info_hash: InfoHash,
    pub name: String,
    /// `false` when the torrent was already registered
    pub created: bool,
}

/// Owns every per-process component that acts on sessions.
pub struct SessionManager {
    engine: Arc<dyn TorrentEngine>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<SessionRegistry>,
    focus: FocusController,
    scheduler: PriorityScheduler,
    monitor: ConnectionHealthMonitor,
    low_seeder: LowSeederPolicy,
    estimator: BufferHealthEstimator,
    events: EventBus,
}

impl SessionManager {
    pub fn new(
        config: &NuruConfig,
        engine: Arc<dyn TorrentEngine>,
        artifacts: Arc<dyn ArtifactStore>,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            artifacts,
            registry: Arc::new(SessionRegistry::new()),
            focus: FocusController::new(),
            scheduler: PriorityScheduler::new(config.scheduler.urgent_fraction),
            monitor: ConnectionHealthMonitor::new(),
            low_seeder: LowSeederPolicy::from_config(&config.network),
            estimator: BufferHealthEstimator,
            events,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn monitor(&self) -> &ConnectionHealthMonitor {
        &self.monitor
    }

    pub fn estimator(&self) -> &BufferHealthEstimator {
        &self.estimator
    }

    pub fn scheduler(&self) -> &PriorityScheduler {
        &self.scheduler
    }

    pub fn focused(&self) -> Option<InfoHash> {
        self.focus.current()
    }

    /// Adds a torrent by magnet URI or hex hash.
    ///
    /// Adding a torrent that is already registered returns its identifier
    /// without touching the engine.
    ///
    /// # Errors
    ///
    /// - `NuruError::InvalidLocator` - Missing or malformed locator
    /// - `NuruError::Engine` - Engine refused the torrent
    pub async fn add_session(&self, locator: &str) -> Result<AddOutcome> {
        let locator = MagnetLocator::parse(locator)?;
        let info_hash = locator.info_hash;

        if let Some(existing) = self.registry.get(&info_hash) {
            tracing::info!(%info_hash, "Torrent already registered");
            return Ok(AddOutcome {
                info_hash,
                name: existing.name,
                created: false,
            });
        }

        let torrent = self.engine.add_torrent(&locator).await?;
        if let Err(e) = torrent.apply_tuning(self.low_seeder.baseline()) {
            tracing::warn!(%info_hash, "Failed to apply baseline tuning: {e}");
        }

        let session = Session::new(Arc::clone(&torrent));
        let name = session.name.clone();
        if !self.registry.insert(session) {
            return Ok(AddOutcome {
                info_hash,
                name,
                created: false,
            });
        }
        tracing::info!(%info_hash, %name, "Session created");

        if torrent.layout().is_some() {
            self.handle_metadata(info_hash);
        } else {
            self.reschedule();
        }

        Ok(AddOutcome {
            info_hash,
            name,
            created: true,
        })
    }

    /// Attaches metadata, announces readiness and reschedules.
    ///
    /// Safe to call repeatedly; only the first call with metadata available
    /// has any effect.
    pub fn handle_metadata(&self, info_hash: InfoHash) {
        let Some(torrent) = self.registry.get(&info_hash).map(|session| session.torrent) else {
            tracing::debug!(%info_hash, "Metadata for unregistered torrent ignored");
            return;
        };
        let Some(layout) = torrent.layout() else {
            return;
        };

        let attached = self
            .registry
            .update(&info_hash, |session| {
                if !session.attach_layout(layout) {
                    return None;
                }
                Some((
                    session.name.clone(),
                    session.primary_file.clone(),
                    session.files().to_vec(),
                ))
            })
            .flatten();
        let Some((name, primary_file, files)) = attached else {
            return;
        };

        match primary_file {
            Some(primary) => {
                tracing::info!(
                    %info_hash,
                    file = %primary.name,
                    length = primary.length,
                    "Torrent ready"
                );
                self.events.publish(NuruEvent::TorrentReady(events::TorrentReady {
                    info_hash,
                    name,
                    primary_file: FileEntry::from(&primary),
                    files: files.iter().map(FileEntry::from).collect(),
                }));
            }
            None => {
                tracing::warn!(%info_hash, "Torrent has no playable video file");
                self.events.publish(NuruEvent::TorrentError(events::TorrentError {
                    info_hash,
                    message: "No playable video file found".to_string(),
                }));
            }
        }

        self.reschedule();
    }

    /// Folds a download-progress event into the session.
    pub fn handle_progress(&self, info_hash: InfoHash, stats: &SwarmStats) {
        let Some((torrent, window)) = self.registry.with_active(&info_hash, |session| {
            (Arc::clone(&session.torrent), session.primary_window())
        }) else {
            return;
        };

        // Probed outside the registry lock; the engine takes its own.
        let buffer_health = self.estimator.measure(torrent.as_ref(), window);
        let score = self.monitor.record(info_hash, stats);
        let low_seeder = self.low_seeder.is_low_seeder(stats.seeders);
        let updated = self.registry.update(&info_hash, |session| {
            let was_low = session.metrics.low_seeder;
            session.metrics.apply_swarm(stats);
            session.metrics.buffer_health = buffer_health;
            session.metrics.connection_health = score;
            session.metrics.quality = classify_throughput(stats.download_speed);
            session.metrics.low_seeder = low_seeder;
            (Arc::clone(&session.torrent), was_low)
        });
        let Some((torrent, was_low)) = updated else {
            return;
        };

        if let Some(tuning) = self.low_seeder.adapt(stats) {
            if !was_low {
                tracing::info!(
                    %info_hash,
                    seeders = stats.seeders,
                    peers = stats.peers,
                    max_connections = tuning.max_connections_per_torrent,
                    "Low seeder swarm, widening connection limits"
                );
            }
            if let Err(e) = torrent.apply_tuning(&tuning) {
                tracing::warn!(%info_hash, "Failed to apply low seeder tuning: {e}");
            }
        }
    }

    pub fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::MetadataReady { info_hash } => self.handle_metadata(info_hash),
            EngineEvent::Download { info_hash, stats } => self.handle_progress(info_hash, &stats),
            EngineEvent::Error { info_hash, message } => {
                if !self.registry.contains(&info_hash) {
                    return;
                }
                tracing::warn!(%info_hash, "Engine error: {message}");
                self.events
                    .publish(NuruEvent::TorrentError(events::TorrentError { info_hash, message }));
            }
        }
    }

    /// Forwards engine events until `shutdown` fires or the engine closes.
    pub fn spawn_engine_listener(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut engine_events = manager.engine.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = engine_events.recv() => match received {
                        Ok(event) => manager.handle_engine_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Engine event listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Engine event listener stopped");
        })
    }

    /// Refreshes every active session's metrics and publishes progress.
    ///
    /// Returns how many sessions were sampled.
    pub fn sample(&self) -> usize {
        let mut sampled = 0;

        for session in self.registry.active() {
            let info_hash = session.info_hash;
            let stats = session.torrent.swarm_stats();
            let buffer_health = self
                .estimator
                .measure(session.torrent.as_ref(), session.primary_window());
            let score = self.monitor.record(info_hash, &stats);
            let low_seeder = self.low_seeder.is_low_seeder(stats.seeders);

            let metrics = self.registry.update(&info_hash, |session| {
                session.metrics.apply_swarm(&stats);
                session.metrics.buffer_health = buffer_health;
                session.metrics.connection_health = score;
                session.metrics.quality = classify_throughput(stats.download_speed);
                session.metrics.low_seeder = low_seeder;
                session.metrics.clone()
            });

            if let Some(metrics) = metrics {
                self.events
                    .publish(NuruEvent::TorrentProgress(events::TorrentProgress { info_hash, metrics }));
                sampled += 1;
            }
        }

        sampled
    }

    /// Focuses a session and reschedules.
    ///
    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - No such active session
    pub fn set_focus(&self, info_hash: InfoHash) -> Result<()> {
        let previous = self.focus.set_focus(&self.registry, info_hash)?;
        if previous != Some(info_hash) {
            tracing::info!(%info_hash, ?previous, "Focus set");
        }
        self.reschedule();
        Ok(())
    }

    /// Clears focus and reschedules.
    pub fn clear_focus(&self) {
        if let Some(previous) = self.focus.clear_focus() {
            tracing::info!(%previous, "Focus cleared");
        }
        self.reschedule();
    }

    /// Runs a full scheduler pass against the current focus.
    pub fn reschedule(&self) -> ScheduleReport {
        self.scheduler.recompute(self.focus.current(), &self.registry)
    }

    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - Unknown session
    pub fn session(&self, info_hash: InfoHash) -> Result<Session> {
        self.registry
            .get(&info_hash)
            .ok_or_else(|| NuruError::session_not_found(info_hash))
    }

    /// File listing; empty until metadata arrives.
    ///
    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - Unknown session
    pub fn files(&self, info_hash: InfoHash) -> Result<Vec<FileEntry>> {
        let session = self.session(info_hash)?;
        Ok(session.files().iter().map(FileEntry::from).collect())
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let focused = self.focus.current();
        self.registry
            .list()
            .iter()
            .map(|session| session.snapshot(focused == Some(session.info_hash)))
            .collect()
    }

    /// Removes a session through the cleanup cascade.
    ///
    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - Unknown session or removal already running
    pub async fn remove_session(&self, info_hash: InfoHash) -> Result<CleanupReport> {
        let session = self
            .registry
            .begin_close(&info_hash)
            .ok_or_else(|| NuruError::session_not_found(info_hash))?;
        tracing::info!(%info_hash, name = %session.name, "Removing session");

        let report = run_cascade(CleanupContext {
            info_hash,
            torrent: session.torrent,
            streams: session.streams,
            engine: self.engine.as_ref(),
            artifacts: self.artifacts.as_ref(),
            registry: &self.registry,
            monitor: &self.monitor,
            focus: &self.focus,
            scheduler: &self.scheduler,
            events: &self.events,
        })
        .await;

        if report.is_complete() {
            tracing::info!(%info_hash, "Session removed");
        } else {
            tracing::warn!(%info_hash, errors = ?report.errors(), "Session removed with cleanup errors");
        }
        Ok(report)
    }

    /// Removes every session. Returns how many cascades ran.
    pub async fn shutdown(&self) -> usize {
        let mut removed = 0;
        for info_hash in self.registry.info_hashes() {
            if self.remove_session(info_hash).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::engine::simulated::{FailurePlan, SimulatedEngine};
    use crate::engine::{EngineTorrent, PieceTier};
    use crate::session::TeardownStep;
    use crate::storage::{ArtifactError, FsArtifactStore};

    struct Fixture {
        _dir: TempDir,
        engine: Arc<SimulatedEngine>,
        manager: Arc<SessionManager>,
    }

    fn fixture() -> Fixture {
        fixture_with_store(|root| Arc::new(FsArtifactStore::new(root)))
    }

    fn fixture_with_store(store: impl FnOnce(&Path) -> Arc<dyn ArtifactStore>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = NuruConfig::for_testing();
        let engine = Arc::new(SimulatedEngine::new(config.simulation.clone(), dir.path()));
        let manager = Arc::new(SessionManager::new(
            &config,
            engine.clone(),
            store(dir.path()),
            EventBus::default(),
        ));
        Fixture {
            _dir: dir,
            engine,
            manager,
        }
    }

    fn magnet(byte: u8) -> String {
        format!("magnet:?xt=urn:btih:{}&dn=Clip{byte}", hex::encode([byte; 20]))
    }

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn remove_artifacts(&self, path: &Path) -> std::result::Result<(), ArtifactError> {
            Err(ArtifactError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let fx = fixture();
        let first = fx.manager.add_session(&magnet(1)).await.unwrap();
        let second = fx.manager.add_session(&magnet(1)).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.info_hash, second.info_hash);
        assert_eq!(first.name, "Clip1");
        assert_eq!(fx.manager.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_locator() {
        let fx = fixture();
        assert!(matches!(
            fx.manager.add_session("").await,
            Err(NuruError::InvalidLocator(_))
        ));
    }

    #[tokio::test]
    async fn test_add_applies_baseline_tuning_and_metadata() {
        let fx = fixture();
        let mut events = fx.manager.events().subscribe();
        let added = fx.manager.add_session(&magnet(2)).await.unwrap();

        let sim = fx.engine.torrent(added.info_hash).unwrap();
        let (tuning, writes) = sim.tuning();
        assert_eq!(tuning.unwrap().max_connections, 200);
        assert_eq!(writes, 1);

        let session = fx.manager.session(added.info_hash).unwrap();
        assert_eq!(session.primary_file.unwrap().name, "Clip2.mp4");
        assert!(matches!(events.recv().await.unwrap(), NuruEvent::TorrentReady(_)));

        // Baseline pass gives the unfocused window normal tier.
        assert_eq!(sim.piece_tier(0), Some(PieceTier::Normal));
    }

    #[tokio::test]
    async fn test_torrent_without_video_stays_registered() {
        let fx = fixture();
        let hash = InfoHash::new([3; 20]);
        fx.engine
            .register_content(hash, vec![("album.flac".to_string(), 50_000)]);
        let mut events = fx.manager.events().subscribe();

        fx.manager.add_session(&hash.to_string()).await.unwrap();

        match events.recv().await.unwrap() {
            NuruEvent::TorrentError(error) => assert_eq!(error.info_hash, hash),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(fx.manager.files(hash).unwrap().len(), 1);
        assert!(fx.manager.session(hash).unwrap().primary_window().is_none());
    }

    #[tokio::test]
    async fn test_refocus_restores_previous_session() {
        let fx = fixture();
        let a = fx.manager.add_session(&magnet(4)).await.unwrap().info_hash;
        let b = fx.manager.add_session(&magnet(5)).await.unwrap().info_hash;
        let sim_a = fx.engine.torrent(a).unwrap();
        let window_a = fx.manager.session(a).unwrap().primary_window().unwrap();
        let last_piece = fx.manager.session(a).unwrap().layout.unwrap().piece_count - 1;

        fx.manager.set_focus(a).unwrap();
        assert_eq!(sim_a.piece_tier(window_a.start), Some(PieceTier::Urgent));
        assert_eq!(sim_a.piece_tier(last_piece), Some(PieceTier::Suppressed));

        fx.manager.set_focus(b).unwrap();
        assert_eq!(fx.manager.focused(), Some(b));
        assert_eq!(sim_a.piece_tier(window_a.start), Some(PieceTier::Normal));
        assert_eq!(sim_a.piece_tier(window_a.end), Some(PieceTier::Normal));
        assert_eq!(sim_a.piece_tier(last_piece), None);

        let sim_b = fx.engine.torrent(b).unwrap();
        assert_eq!(sim_b.piece_tier(0), Some(PieceTier::Urgent));
    }

    #[tokio::test]
    async fn test_failed_restore_is_retried_on_next_pass() {
        let fx = fixture();
        let a = fx.manager.add_session(&magnet(10)).await.unwrap().info_hash;
        let b = fx.manager.add_session(&magnet(11)).await.unwrap().info_hash;
        let sim_a = fx.engine.torrent(a).unwrap();
        let last_piece = fx.manager.session(a).unwrap().layout.unwrap().piece_count - 1;

        fx.manager.set_focus(a).unwrap();
        sim_a.set_failures(FailurePlan {
            restore_priority: true,
            ..Default::default()
        });
        fx.manager.set_focus(b).unwrap();
        assert_eq!(sim_a.piece_tier(last_piece), Some(PieceTier::Suppressed));
        assert_eq!(fx.manager.scheduler().pending_restores(), 1);

        // Still refused: the restore stays queued across passes.
        fx.manager.reschedule();
        assert_eq!(fx.manager.scheduler().pending_restores(), 1);

        sim_a.set_failures(FailurePlan::default());
        let report = fx.manager.reschedule();
        assert_eq!(report.failed_writes, 0);
        assert_eq!(sim_a.piece_tier(last_piece), None);
        assert_eq!(fx.manager.scheduler().pending_restores(), 0);

        // Later passes leave the default tier alone.
        fx.manager.reschedule();
        assert_eq!(sim_a.piece_tier(last_piece), None);
    }

    #[tokio::test]
    async fn test_focus_unknown_session() {
        let fx = fixture();
        assert!(matches!(
            fx.manager.set_focus(InfoHash::new([6; 20])),
            Err(NuruError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_low_seeder_progress_widens_limits() {
        let fx = fixture();
        let hash = fx.manager.add_session(&magnet(7)).await.unwrap().info_hash;
        let stats = SwarmStats {
            peers: 40,
            seeders: 1,
            download_speed: 6_000_000,
            ..Default::default()
        };

        fx.manager.handle_progress(hash, &stats);
        fx.manager.handle_progress(hash, &stats);

        let session = fx.manager.session(hash).unwrap();
        assert!(session.metrics.low_seeder);
        assert_eq!(session.metrics.quality.as_str(), "medium");

        let (tuning, writes) = fx.engine.torrent(hash).unwrap().tuning();
        let tuning = tuning.unwrap();
        assert_eq!(tuning.max_connections_per_torrent, 80);
        assert_eq!(tuning.piece_timeout, std::time::Duration::from_secs(60));
        // Baseline plus two identical adaptations.
        assert_eq!(writes, 3);
    }

    #[tokio::test]
    async fn test_progress_event_refreshes_buffer_health() {
        let fx = fixture();
        let hash = fx.manager.add_session(&magnet(9)).await.unwrap().info_hash;
        let sim = fx.engine.torrent(hash).unwrap();

        fx.manager.handle_progress(hash, &sim.swarm_stats());
        assert_eq!(fx.manager.session(hash).unwrap().metrics.buffer_health, 0.0);

        sim.complete_all();
        fx.manager.handle_progress(hash, &sim.swarm_stats());

        let metrics = fx.manager.session(hash).unwrap().metrics;
        assert_eq!(metrics.progress, 1.0);
        assert_eq!(metrics.buffer_health, 1.0);
    }

    #[tokio::test]
    async fn test_sample_publishes_progress() {
        let fx = fixture();
        let hash = fx.manager.add_session(&magnet(8)).await.unwrap().info_hash;
        let sim = fx.engine.torrent(hash).unwrap();
        sim.complete_all();
        sim.set_swarm(10, 5, 5);
        let mut events = fx.manager.events().subscribe();

        assert_eq!(fx.manager.sample(), 1);

        let NuruEvent::TorrentProgress(progress) = events.recv().await.unwrap() else {
            panic!("expected progress event");
        };
        assert_eq!(progress.info_hash, hash);
        assert_eq!(progress.metrics.progress, 1.0);
        assert_eq!(progress.metrics.buffer_health, 1.0);
        assert!(!progress.metrics.low_seeder);
        assert!(fx.manager.monitor().get(&hash).is_some());
    }

    #[tokio::test]
    async fn test_remove_runs_full_cascade() {
        let fx = fixture();
        let hash = fx.manager.add_session(&magnet(9)).await.unwrap().info_hash;
        fx.manager.set_focus(hash).unwrap();
        fx.manager.sample();
        let download_dir = fx.engine.torrent(hash).unwrap().download_dir();
        assert!(download_dir.exists());
        let mut events = fx.manager.events().subscribe();

        let report = fx.manager.remove_session(hash).await.unwrap();

        assert!(report.is_complete(), "{:?}", report.errors());
        assert!(report.was_focused);
        assert_eq!(report.outcomes.len(), TeardownStep::ORDER.len());
        assert!(fx.manager.registry().is_empty());
        assert!(fx.manager.monitor().get(&hash).is_none());
        assert_eq!(fx.manager.focused(), None);
        assert!(!download_dir.exists());
        assert!(fx.engine.torrent(hash).is_none());

        let NuruEvent::TorrentRemoved(removed) = events.recv().await.unwrap() else {
            panic!("expected removal event");
        };
        assert!(removed.cleanup_complete);

        assert!(matches!(
            fx.manager.remove_session(hash).await,
            Err(NuruError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_survives_failing_steps() {
        let fx = fixture_with_store(|_| Arc::new(FailingStore));
        let hash = fx.manager.add_session(&magnet(10)).await.unwrap().info_hash;
        fx.manager.set_focus(hash).unwrap();
        fx.engine.torrent(hash).unwrap().set_failures(crate::engine::FailurePlan {
            destroy: true,
            ..Default::default()
        });

        let report = fx.manager.remove_session(hash).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(
            report.failed_steps(),
            vec![TeardownStep::DestroyHandle, TeardownStep::DeleteArtifacts]
        );
        assert!(fx.manager.registry().is_empty());
        assert_eq!(fx.manager.focused(), None);
    }

    #[tokio::test]
    async fn test_engine_listener_handles_events() {
        let fx = fixture();
        let shutdown = CancellationToken::new();
        let listener = fx.manager.spawn_engine_listener(shutdown.clone());
        let hash = fx.manager.add_session(&magnet(11)).await.unwrap().info_hash;
        let sim = fx.engine.torrent(hash).unwrap();
        sim.set_swarm(6, 0, 6);

        sim.announce_progress();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !fx.manager.session(hash).unwrap().metrics.low_seeder {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        listener.await.unwrap();
    }
}
