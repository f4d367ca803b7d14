//! Per-session connection health tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::MIB;
use crate::engine::SwarmStats;
use crate::torrent::InfoHash;

/// Mean of saturated throughput, peer and seeder scores, in `[0, 1]`.
///
/// Each term saturates at 1 MiB/s, 10 peers and 5 seeders respectively.
pub fn connection_score(bytes_per_second: u64, peers: u32, seeders: u32) -> f64 {
    let throughput = (bytes_per_second as f64 / MIB).min(1.0);
    let peers = (f64::from(peers) / 10.0).min(1.0);
    let seeders = (f64::from(seeders) / 5.0).min(1.0);

    (throughput + peers + seeders) / 3.0
}

/// Last observation for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub updated_at: DateTime<Utc>,
    pub peers: u32,
    pub seeders: u32,
    pub download_speed: u64,
    pub score: f64,
}

/// Auxiliary per-session state kept beside the registry.
#[derive(Debug, Default)]
pub struct ConnectionHealthMonitor {
    entries: RwLock<HashMap<InfoHash, ConnectionHealth>>,
}

impl ConnectionHealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sample and returns the fresh score.
    pub fn record(&self, info_hash: InfoHash, stats: &SwarmStats) -> f64 {
        let score = connection_score(stats.download_speed, stats.peers, stats.seeders);
        self.entries.write().insert(
            info_hash,
            ConnectionHealth {
                updated_at: Utc::now(),
                peers: stats.peers,
                seeders: stats.seeders,
                download_speed: stats.download_speed,
                score,
            },
        );
        score
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<ConnectionHealth> {
        self.entries.read().get(info_hash).cloned()
    }

    /// Drops state for a session. Returns whether anything was stored.
    pub fn forget(&self, info_hash: &InfoHash) -> bool {
        self.entries.write().remove(info_hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_score_saturates() {
        assert_eq!(connection_score(10 * 1_048_576, 50, 20), 1.0);
        assert_eq!(connection_score(0, 0, 0), 0.0);
    }

    #[test]
    fn test_score_is_mean_of_terms() {
        // 0.5 + 0.5 + 0.2 over three terms
        let score = connection_score(524_288, 5, 1);
        assert!((score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_monitor_record_and_forget() {
        let monitor = ConnectionHealthMonitor::new();
        let hash = InfoHash::new([3; 20]);
        let stats = SwarmStats {
            download_speed: 1_048_576,
            peers: 10,
            seeders: 5,
            ..Default::default()
        };

        assert_eq!(monitor.record(hash, &stats), 1.0);
        assert_eq!(monitor.get(&hash).map(|h| h.peers), Some(10));
        assert!(monitor.forget(&hash));
        assert!(!monitor.forget(&hash));
        assert!(monitor.is_empty());
    }

    proptest! {
        #[test]
        fn prop_score_in_unit_interval(speed in any::<u64>(), peers in any::<u32>(), seeders in any::<u32>()) {
            let score = connection_score(speed, peers, seeders);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
