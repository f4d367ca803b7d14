//! In-process engine that fabricates a swarm.
//!
//! Backs `nuru serve` and the test suites. Content is a
//! deterministic byte pattern, so any range can be checked without touching
//! disk. A driver task per torrent publishes metadata after a delay and then
//! completes pieces in tier order at the configured speed; readers waiting on
//! a missing piece pull it to the front of the queue.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::{
    ByteStream, ConnectionTuning, EngineError, EngineEvent, EngineTorrent, PieceTier, SwarmStats,
    TorrentEngine,
};
use crate::config::SimulationConfig;
use crate::torrent::{ContentLayout, FileDescriptor, InfoHash, MagnetLocator};

const EVENT_CAPACITY: usize = 256;
const READ_CHUNK: u64 = 64 * 1024;
const BITFIELD_FILE: &str = "resume.bitfield";

/// Byte stored at `offset` of every simulated torrent's concatenated content.
pub fn content_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// Expected bytes for the inclusive absolute range `start..=end`.
pub fn content_bytes(start: u64, end: u64) -> Vec<u8> {
    (start..=end).map(content_byte).collect()
}

/// Faults to inject into one simulated torrent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    /// `open_read_stream` fails outright
    pub open_read: bool,
    /// Read streams error once they reach this many bytes into the file
    pub read_error_after: Option<u64>,
    /// `destroy` reports an I/O error
    pub destroy: bool,
    /// `remove_torrent` is rejected
    pub remove: bool,
    /// `restore_piece_priority` is rejected
    pub restore_priority: bool,
}

struct PieceState {
    metadata_ready: bool,
    completed: Vec<bool>,
    tiers: Vec<Option<PieceTier>>,
    wanted: BTreeSet<u32>,
    auto_download: bool,
    tuning: Option<ConnectionTuning>,
    tuning_writes: usize,
    last_speed: u64,
    swarm_override: Option<(u32, u32, u32)>,
    failures: FailurePlan,
    rng: ChaCha8Rng,
    destroyed: bool,
}

impl PieceState {
    fn completed_count(&self) -> usize {
        self.completed.iter().filter(|done| **done).count()
    }

    fn all_complete(&self) -> bool {
        self.completed.iter().all(|done| *done)
    }

    /// Picks up to `budget` missing pieces: reader demand first, then by
    /// tier and index.
    fn next_pieces(&mut self, budget: usize) -> Vec<u32> {
        let mut picked: Vec<u32> = Vec::with_capacity(budget);

        while picked.len() < budget {
            let Some(piece) = self.wanted.pop_first() else {
                break;
            };
            if !self.completed[piece as usize] {
                picked.push(piece);
            }
        }

        if self.auto_download && picked.len() < budget {
            let mut candidates: Vec<u32> = (0..self.completed.len() as u32)
                .filter(|piece| !self.completed[*piece as usize] && !picked.contains(piece))
                .collect();
            candidates.sort_by_key(|piece| {
                (
                    std::cmp::Reverse(tier_rank(self.tiers[*piece as usize])),
                    *piece,
                )
            });
            picked.extend(candidates.into_iter().take(budget - picked.len()));
        }

        picked
    }
}

/// Engine default sits between `Suppressed` and `Normal`.
fn tier_rank(tier: Option<PieceTier>) -> u8 {
    match tier {
        Some(PieceTier::Suppressed) => 0,
        None => 1,
        Some(PieceTier::Normal) => 2,
        Some(PieceTier::High) => 3,
        Some(PieceTier::Urgent) => 4,
    }
}

/// One fabricated torrent.
pub struct SimulatedTorrent {
    info_hash: InfoHash,
    name: String,
    download_dir: PathBuf,
    planned: ContentLayout,
    config: SimulationConfig,
    state: Arc<Mutex<PieceState>>,
    progress: watch::Sender<u64>,
    cancel: CancellationToken,
    events: broadcast::Sender<EngineEvent>,
}

impl std::fmt::Debug for SimulatedTorrent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedTorrent")
            .field("info_hash", &self.info_hash)
            .field("name", &self.name)
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

impl SimulatedTorrent {
    fn piece_count(&self) -> u32 {
        self.planned.piece_count
    }

    fn bump_progress(&self) {
        self.progress.send_modify(|generation| *generation += 1);
    }

    fn publish_metadata(&self) {
        self.state.lock().metadata_ready = true;
        tracing::debug!(info_hash = %self.info_hash, "Simulated metadata ready");
        let _ = self.events.send(EngineEvent::MetadataReady {
            info_hash: self.info_hash,
        });
    }

    /// Completes up to `budget` pieces. Returns how many were completed.
    fn fetch(&self, budget: usize) -> usize {
        let tick_ms = self.config.tick.as_millis().max(1) as u64;
        let mut state = self.state.lock();
        let pieces = state.next_pieces(budget);
        for piece in &pieces {
            state.completed[*piece as usize] = true;
        }
        state.last_speed = pieces.len() as u64 * u64::from(self.planned.piece_length) * 1000
            / tick_ms;
        pieces.len()
    }

    fn bitfield(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut bytes = vec![0u8; state.completed.len().div_ceil(8)];
        for (index, done) in state.completed.iter().enumerate() {
            if *done {
                bytes[index / 8] |= 0x80 >> (index % 8);
            }
        }
        bytes
    }

    fn restore_bitfield(&self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        if bytes.len() != state.completed.len().div_ceil(8) {
            return 0;
        }
        let mut restored = 0;
        for index in 0..state.completed.len() {
            if bytes[index / 8] & (0x80 >> (index % 8)) != 0 {
                state.completed[index] = true;
                restored += 1;
            }
        }
        restored
    }

    async fn persist_bitfield(&self) {
        let path = self.download_dir.join(BITFIELD_FILE);
        if let Err(e) = tokio::fs::write(&path, self.bitfield()).await {
            tracing::warn!(info_hash = %self.info_hash, "Failed to persist resume bitfield: {e}");
        }
    }

    fn stats(&self) -> SwarmStats {
        let mut state = self.state.lock();
        if !state.metadata_ready {
            return SwarmStats::default();
        }

        let total = state.completed.len().max(1);
        let completed = state.completed_count();
        let piece_length = u64::from(self.planned.piece_length);
        let total_length = self.planned.total_length();
        let mut downloaded = completed as u64 * piece_length;
        if state.completed.last().copied().unwrap_or(false) {
            let tail = total_length % piece_length;
            if tail != 0 {
                downloaded -= piece_length - tail;
            }
        }

        let (peers, seeders, leechers) = match state.swarm_override {
            Some(counts) => counts,
            None if self.config.jitter => {
                let peers = jitter(&mut state.rng, self.config.peers);
                let seeders = jitter(&mut state.rng, self.config.seeders).min(peers);
                (peers, seeders, peers - seeders)
            }
            None => (
                self.config.peers,
                self.config.seeders,
                self.config.leechers,
            ),
        };

        SwarmStats {
            progress: completed as f64 / total as f64,
            download_speed: state.last_speed,
            upload_speed: state.last_speed / 8,
            downloaded: downloaded.min(total_length),
            peers,
            seeders,
            leechers,
        }
    }

    fn publish_stats(&self) {
        let _ = self.events.send(EngineEvent::Download {
            info_hash: self.info_hash,
            stats: self.stats(),
        });
    }

    /// Marks every piece in `pieces` complete and wakes waiting readers.
    pub fn complete_pieces(&self, pieces: RangeInclusive<u32>) {
        {
            let mut state = self.state.lock();
            let last = state.completed.len().saturating_sub(1) as u32;
            for piece in *pieces.start()..=(*pieces.end()).min(last) {
                state.completed[piece as usize] = true;
            }
        }
        self.bump_progress();
    }

    /// Marks the whole torrent complete.
    pub fn complete_all(&self) {
        let count = self.piece_count();
        if count > 0 {
            self.complete_pieces(0..=count - 1);
        }
    }

    /// Pins reported peer counts, disabling jitter for this torrent.
    pub fn set_swarm(&self, peers: u32, seeders: u32, leechers: u32) {
        self.state.lock().swarm_override = Some((peers, seeders, leechers));
    }

    /// Pins the reported download speed until the driver overwrites it.
    pub fn set_download_speed(&self, bytes_per_second: u64) {
        self.state.lock().last_speed = bytes_per_second;
    }

    pub fn set_failures(&self, plan: FailurePlan) {
        self.state.lock().failures = plan;
    }

    pub fn set_auto_download(&self, enabled: bool) {
        self.state.lock().auto_download = enabled;
    }

    /// Publishes a download event with the current figures.
    pub fn announce_progress(&self) {
        self.publish_stats();
    }

    /// Tier currently written for `piece`, `None` for engine default.
    pub fn piece_tier(&self, piece: u32) -> Option<PieceTier> {
        self.state.lock().tiers.get(piece as usize).copied().flatten()
    }

    /// Last tuning applied and how many times tuning was written.
    pub fn tuning(&self) -> (Option<ConnectionTuning>, usize) {
        let state = self.state.lock();
        (state.tuning.clone(), state.tuning_writes)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn check_usable(&self, require_metadata: bool) -> Result<(), EngineError> {
        let state = self.state.lock();
        if state.destroyed {
            return Err(EngineError::Destroyed {
                info_hash: self.info_hash,
            });
        }
        if require_metadata && !state.metadata_ready {
            return Err(EngineError::MetadataPending {
                info_hash: self.info_hash,
            });
        }
        Ok(())
    }

    fn write_tiers(
        &self,
        pieces: RangeInclusive<u32>,
        tier: Option<PieceTier>,
    ) -> Result<(), EngineError> {
        self.check_usable(true)?;
        let mut state = self.state.lock();
        let last = state.tiers.len().saturating_sub(1) as u32;
        if *pieces.start() > last {
            return Ok(());
        }
        for piece in *pieces.start()..=(*pieces.end()).min(last) {
            state.tiers[piece as usize] = tier;
        }
        Ok(())
    }
}

fn jitter(rng: &mut ChaCha8Rng, base: u32) -> u32 {
    let spread = base / 4;
    base - spread + rng.random_range(0..=spread * 2)
}

#[async_trait]
impl EngineTorrent for SimulatedTorrent {
    fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn layout(&self) -> Option<ContentLayout> {
        self.state
            .lock()
            .metadata_ready
            .then(|| self.planned.clone())
    }

    fn is_piece_complete(&self, piece: u32) -> bool {
        self.state
            .lock()
            .completed
            .get(piece as usize)
            .copied()
            .unwrap_or(false)
    }

    fn swarm_stats(&self) -> SwarmStats {
        self.stats()
    }

    fn set_piece_priority(
        &self,
        pieces: RangeInclusive<u32>,
        tier: PieceTier,
    ) -> Result<(), EngineError> {
        self.write_tiers(pieces, Some(tier))
    }

    fn restore_piece_priority(&self, pieces: RangeInclusive<u32>) -> Result<(), EngineError> {
        if self.state.lock().failures.restore_priority {
            return Err(EngineError::Rejected {
                reason: "priority restore refused".to_string(),
            });
        }
        self.write_tiers(pieces, None)
    }

    fn apply_tuning(&self, tuning: &ConnectionTuning) -> Result<(), EngineError> {
        self.check_usable(false)?;
        let mut state = self.state.lock();
        state.tuning = Some(tuning.clone());
        state.tuning_writes += 1;
        Ok(())
    }

    async fn open_read_stream(
        &self,
        file_index: usize,
        range: RangeInclusive<u64>,
    ) -> Result<ByteStream, EngineError> {
        self.check_usable(true)?;
        let failures = self.state.lock().failures;
        if failures.open_read {
            return Err(EngineError::Io(io::Error::other("injected open failure")));
        }

        let file = self.planned.files.get(file_index).ok_or(
            EngineError::FileIndexOutOfRange {
                index: file_index,
                file_count: self.planned.files.len(),
            },
        )?;
        let (start, end) = (*range.start(), *range.end());
        if start > end || end >= file.length {
            return Err(EngineError::RangeOutOfBounds {
                start,
                end,
                file_length: file.length,
            });
        }

        let cursor = ReadCursor {
            info_hash: self.info_hash,
            state: Arc::clone(&self.state),
            progress: self.progress.subscribe(),
            cancel: self.cancel.clone(),
            piece_length: u64::from(self.planned.piece_length),
            position: file.offset + start,
            end: file.offset + end,
            fail_at: failures.read_error_after.map(|after| file.offset + after),
        };

        Ok(Box::pin(futures::stream::unfold(
            cursor,
            |mut cursor| async move { cursor.next_chunk().await.map(|item| (item, cursor)) },
        )))
    }

    fn download_dir(&self) -> PathBuf {
        self.download_dir.clone()
    }

    async fn destroy(&self) -> Result<(), EngineError> {
        let fail = {
            let mut state = self.state.lock();
            state.destroyed = true;
            state.failures.destroy
        };
        self.cancel.cancel();
        self.bump_progress();

        if fail {
            return Err(EngineError::Io(io::Error::other("injected destroy failure")));
        }
        tracing::debug!(info_hash = %self.info_hash, "Simulated torrent destroyed");
        Ok(())
    }
}

struct ReadCursor {
    info_hash: InfoHash,
    state: Arc<Mutex<PieceState>>,
    progress: watch::Receiver<u64>,
    cancel: CancellationToken,
    piece_length: u64,
    position: u64,
    end: u64,
    fail_at: Option<u64>,
}

impl ReadCursor {
    fn finish(&mut self) {
        self.position = self.end + 1;
    }

    fn aborted(&mut self) -> io::Error {
        self.finish();
        io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("torrent {} destroyed", self.info_hash),
        )
    }

    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.position > self.end {
            return None;
        }
        if self.fail_at.is_some_and(|limit| self.position >= limit) {
            self.finish();
            return Some(Err(io::Error::other("injected read failure")));
        }

        let piece = (self.position / self.piece_length) as u32;
        loop {
            self.progress.borrow_and_update();
            {
                let mut state = self.state.lock();
                if state.destroyed {
                    drop(state);
                    return Some(Err(self.aborted()));
                }
                if state.completed[piece as usize] {
                    break;
                }
                state.wanted.insert(piece);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Some(Err(self.aborted())),
                changed = self.progress.changed() => {
                    if changed.is_err() {
                        return Some(Err(self.aborted()));
                    }
                }
            }
        }

        let piece_end = (u64::from(piece) + 1) * self.piece_length - 1;
        let mut chunk_end = self
            .end
            .min(piece_end)
            .min(self.position + READ_CHUNK - 1);
        if let Some(limit) = self.fail_at {
            chunk_end = chunk_end.min(limit.saturating_sub(1)).max(self.position);
        }

        let bytes = Bytes::from(content_bytes(self.position, chunk_end));
        self.position = chunk_end + 1;
        Some(Ok(bytes))
    }
}

/// Engine fabricating torrents from configuration.
pub struct SimulatedEngine {
    config: SimulationConfig,
    download_root: PathBuf,
    torrents: RwLock<HashMap<InfoHash, Arc<SimulatedTorrent>>>,
    content: RwLock<HashMap<InfoHash, Vec<(String, u64)>>>,
    events: broadcast::Sender<EngineEvent>,
}

impl SimulatedEngine {
    /// Creates an engine that keeps per-torrent directories under
    /// `download_root`.
    pub fn new(config: SimulationConfig, download_root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            download_root: download_root.into(),
            torrents: RwLock::new(HashMap::new()),
            content: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Overrides the file list generated for `info_hash`.
    ///
    /// Must be called before the torrent is added.
    pub fn register_content(&self, info_hash: InfoHash, files: Vec<(String, u64)>) {
        self.content.write().insert(info_hash, files);
    }

    /// Concrete handle for test controls.
    pub fn torrent(&self, info_hash: InfoHash) -> Option<Arc<SimulatedTorrent>> {
        self.torrents.read().get(&info_hash).cloned()
    }

    fn plan_layout(&self, info_hash: InfoHash, name: &str) -> ContentLayout {
        let entries = self.content.read().get(&info_hash).cloned().unwrap_or_else(|| {
            vec![
                (format!("{name}.mp4"), self.config.content_size),
                (format!("{name}.en.srt"), 24 * 1024),
                ("sample.mkv".to_string(), (self.config.content_size / 16).max(1)),
            ]
        });

        let mut offset = 0;
        let files = entries
            .into_iter()
            .enumerate()
            .map(|(index, (name, length))| {
                let file = FileDescriptor {
                    index,
                    name,
                    length,
                    offset,
                };
                offset += length;
                file
            })
            .collect::<Vec<_>>();

        let piece_length = self.config.piece_length;
        ContentLayout {
            piece_length,
            piece_count: offset.div_ceil(u64::from(piece_length)).max(1) as u32,
            files,
        }
    }

    fn rng_for(&self, info_hash: InfoHash) -> ChaCha8Rng {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&info_hash.as_bytes()[..8]);
        let salt = u64::from_le_bytes(prefix);
        let seed = self.config.deterministic_seed.unwrap_or_else(rand::random);
        ChaCha8Rng::seed_from_u64(seed ^ salt)
    }
}

async fn load_bitfield(dir: &Path) -> Option<Vec<u8>> {
    tokio::fs::read(dir.join(BITFIELD_FILE)).await.ok()
}

async fn drive(torrent: Arc<SimulatedTorrent>) {
    let config = torrent.config.clone();

    if !config.metadata_delay.is_zero() {
        tokio::select! {
            _ = torrent.cancel.cancelled() => return,
            _ = tokio::time::sleep(config.metadata_delay) => {}
        }
    }
    torrent.publish_metadata();

    let tick_bytes = config.download_speed as u128 * config.tick.as_millis().max(1) / 1000;
    let budget = (tick_bytes / u128::from(config.piece_length)).max(1) as usize;

    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + config.tick, config.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = torrent.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let completed = torrent.fetch(budget);
        if completed > 0 {
            torrent.bump_progress();
            torrent.persist_bitfield().await;
        }
        let finished = torrent.state.lock().all_complete();
        if completed > 0 || !finished {
            torrent.publish_stats();
        }
    }

    tracing::trace!(info_hash = %torrent.info_hash, "Simulation driver stopped");
}

#[async_trait]
impl TorrentEngine for SimulatedEngine {
    async fn add_torrent(
        &self,
        locator: &MagnetLocator,
    ) -> Result<Arc<dyn EngineTorrent>, EngineError> {
        let info_hash = locator.info_hash;
        if let Some(existing) = self.torrent(info_hash) {
            return Ok(existing);
        }

        let name = locator.name_or_fallback();
        let planned = self.plan_layout(info_hash, &name);
        let download_dir = self.download_root.join(info_hash.to_string());
        tokio::fs::create_dir_all(&download_dir).await?;

        let piece_count = planned.piece_count as usize;
        let (progress, _) = watch::channel(0);
        let torrent = Arc::new(SimulatedTorrent {
            info_hash,
            name,
            download_dir,
            planned,
            config: self.config.clone(),
            state: Arc::new(Mutex::new(PieceState {
                metadata_ready: false,
                completed: vec![false; piece_count],
                tiers: vec![None; piece_count],
                wanted: BTreeSet::new(),
                auto_download: self.config.auto_download,
                tuning: None,
                tuning_writes: 0,
                last_speed: 0,
                swarm_override: None,
                failures: FailurePlan::default(),
                rng: self.rng_for(info_hash),
                destroyed: false,
            })),
            progress,
            cancel: CancellationToken::new(),
            events: self.events.clone(),
        });

        if let Some(bytes) = load_bitfield(&torrent.download_dir).await {
            let restored = torrent.restore_bitfield(&bytes);
            tracing::debug!(%info_hash, restored, "Restored pieces from resume bitfield");
        }

        // Concurrent adds of the same hash keep the first handle.
        let torrent = match self.torrents.write().entry(info_hash) {
            Entry::Occupied(existing) => {
                return Ok(Arc::clone(existing.get()) as Arc<dyn EngineTorrent>);
            }
            Entry::Vacant(slot) => Arc::clone(slot.insert(torrent)),
        };
        if self.config.metadata_delay.is_zero() {
            torrent.publish_metadata();
        }
        tokio::spawn(drive(Arc::clone(&torrent)));

        tracing::info!(%info_hash, name = %torrent.name, "Simulated torrent added");
        Ok(torrent)
    }

    async fn remove_torrent(&self, info_hash: InfoHash) -> Result<(), EngineError> {
        let torrent = self
            .torrent(info_hash)
            .ok_or(EngineError::UnknownTorrent { info_hash })?;
        if torrent.state.lock().failures.remove {
            return Err(EngineError::Rejected {
                reason: "injected remove failure".to_string(),
            });
        }

        self.torrents.write().remove(&info_hash);
        torrent.cancel.cancel();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
