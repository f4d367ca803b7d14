//! Centralized configuration for Nuru.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::NuruError;
use crate::engine::ConnectionTuning;

/// Central configuration for all Nuru components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct NuruConfig {
    pub server: ServerConfig,
    pub streaming: StreamingConfig,
    pub scheduler: SchedulerConfig,
    pub sampler: SamplerConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub simulation: SimulationConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind_address: String,
    pub port: u16,
    /// Optional directory of static player assets served at `/`
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: None,
        }
    }
}

/// Response streaming limits.
///
/// Memory held per open response is bounded by
/// `chunk_size * channel_capacity`.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Largest chunk handed to the response body
    pub chunk_size: usize,
    /// Chunks buffered between the engine reader and the client
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024, // 256 KiB
            channel_capacity: 8,
        }
    }
}

/// Piece priority scheduling.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Leading share of the focused window marked urgent
    pub urgent_fraction: f64,
    /// Interval of the server-side focus guard
    pub focus_guard_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            urgent_fraction: 0.2,
            focus_guard_interval: Duration::from_secs(5),
        }
    }
}

/// Periodic metric sampling.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Connection limits handed to the engine.
///
/// The baseline applies to every new session; the widened values replace it
/// while a swarm has fewer than `low_seeder_threshold` seeders.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Process-wide connection ceiling
    pub max_connections: u32,
    /// Per-torrent connection ceiling
    pub max_connections_per_torrent: u32,
    /// Piece request timeout
    pub piece_timeout: Duration,
    /// Seeder count below which a swarm counts as starved
    pub low_seeder_threshold: u32,
    /// Upper bound for the widened per-torrent ceiling
    pub widened_connection_ceiling: u32,
    /// Piece request timeout while starved
    pub widened_piece_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_connections: 200,
            max_connections_per_torrent: 50,
            piece_timeout: Duration::from_secs(30),
            low_seeder_threshold: 3,
            widened_connection_ceiling: 100,
            widened_piece_timeout: Duration::from_secs(60),
        }
    }
}

impl NetworkConfig {
    /// Tuning applied to every freshly created session.
    pub fn baseline_tuning(&self) -> ConnectionTuning {
        ConnectionTuning {
            max_connections: self.max_connections,
            max_connections_per_torrent: self.max_connections_per_torrent,
            piece_timeout: self.piece_timeout,
            dht: true,
            trackers: true,
            local_discovery: true,
        }
    }
}

/// On-disk layout.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root under which every session gets its own download directory
    pub download_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_root: std::env::temp_dir().join("nuru"),
        }
    }
}

/// Simulated engine parameters for development and testing.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Piece length of generated torrents
    pub piece_length: u32,
    /// Size of the generated feature video
    pub content_size: u64,
    /// Delay before metadata becomes available
    pub metadata_delay: Duration,
    /// Simulated download speed in bytes per second
    pub download_speed: u64,
    /// Driver tick
    pub tick: Duration,
    /// Fetch pieces in the background, not only on read demand
    pub auto_download: bool,
    pub peers: u32,
    pub seeders: u32,
    pub leechers: u32,
    /// Deterministic seed for swarm jitter (None = entropy)
    pub deterministic_seed: Option<u64>,
    /// Randomly vary reported peer counts and speeds
    pub jitter: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            piece_length: 256 * 1024,
            content_size: 64 * 1024 * 1024,
            metadata_delay: Duration::from_millis(750),
            download_speed: 4 * 1024 * 1024, // 4 MiB/s
            tick: Duration::from_millis(250),
            auto_download: true,
            peers: 12,
            seeders: 5,
            leechers: 7,
            deterministic_seed: None,
            jitter: true,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            piece_length: 16 * 1024,
            content_size: 1024 * 1024,
            metadata_delay: Duration::ZERO,
            download_speed: 16 * 1024 * 1024,
            tick: Duration::from_millis(10),
            auto_download: false,
            peers: 8,
            seeders: 4,
            leechers: 4,
            deterministic_seed: Some(42),
            jitter: false,
        }
    }
}

impl NuruConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = std::env::var("NURU_BIND_ADDRESS") {
            config.server.bind_address = address;
        }
        if let Some(port) = env_parse("NURU_PORT") {
            config.server.port = port;
        }
        if let Ok(dir) = std::env::var("NURU_STATIC_DIR") {
            config.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Ok(root) = std::env::var("NURU_DOWNLOAD_ROOT") {
            config.storage.download_root = PathBuf::from(root);
        }
        if let Some(size) = env_parse("NURU_STREAM_CHUNK_SIZE") {
            config.streaming.chunk_size = size;
        }
        if let Some(capacity) = env_parse("NURU_STREAM_CHANNEL_CAPACITY") {
            config.streaming.channel_capacity = capacity;
        }
        if let Some(ms) = env_parse("NURU_SAMPLE_INTERVAL_MS") {
            config.sampler.interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse("NURU_FOCUS_GUARD_SECS") {
            config.scheduler.focus_guard_interval = Duration::from_secs(secs);
        }
        if let Some(seed) = env_parse("NURU_SIMULATION_SEED") {
            config.simulation.deterministic_seed = Some(seed);
        }
        if let Some(speed) = env_parse("NURU_SIMULATED_SPEED") {
            config.simulation.download_speed = speed;
        }

        config
    }

    /// Creates a configuration optimized for testing.
    pub fn for_testing() -> Self {
        Self {
            sampler: SamplerConfig {
                interval: Duration::from_millis(50),
            },
            scheduler: SchedulerConfig {
                focus_guard_interval: Duration::from_millis(200),
                ..Default::default()
            },
            streaming: StreamingConfig {
                chunk_size: 4096,
                channel_capacity: 2,
            },
            simulation: SimulationConfig::deterministic_testing(),
            ..Default::default()
        }
    }

    /// Rejects settings the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// - `NuruError::Configuration` - A value is zero or out of range
    pub fn validate(&self) -> Result<(), NuruError> {
        let reject = |reason: &str| {
            Err(NuruError::Configuration {
                reason: reason.to_string(),
            })
        };

        if self.streaming.chunk_size == 0 || self.streaming.channel_capacity == 0 {
            return reject("streaming chunk size and channel capacity must be positive");
        }
        if !(self.scheduler.urgent_fraction > 0.0 && self.scheduler.urgent_fraction <= 1.0) {
            return reject("urgent fraction must lie in (0, 1]");
        }
        if self.sampler.interval.is_zero() || self.scheduler.focus_guard_interval.is_zero() {
            return reject("sampler and focus guard intervals must be positive");
        }
        if self.simulation.piece_length == 0 {
            return reject("simulated piece length must be positive");
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
