//! Connection widening for swarms with few seeders.

use std::time::Duration;

use crate::config::NetworkConfig;
use crate::engine::{ConnectionTuning, SwarmStats};

/// Decides when and how far to widen a session's connection limits.
///
/// The decision depends only on the latest swarm figures, so repeated
/// application with the same figures yields the same tuning.
#[derive(Debug, Clone)]
pub struct LowSeederPolicy {
    threshold: u32,
    baseline: ConnectionTuning,
    widened_ceiling: u32,
    widened_timeout: Duration,
}

impl LowSeederPolicy {
    pub fn from_config(network: &NetworkConfig) -> Self {
        Self {
            threshold: network.low_seeder_threshold,
            baseline: network.baseline_tuning(),
            widened_ceiling: network.widened_connection_ceiling,
            widened_timeout: network.widened_piece_timeout,
        }
    }

    /// Tuning every session starts with.
    pub fn baseline(&self) -> &ConnectionTuning {
        &self.baseline
    }

    pub fn is_low_seeder(&self, seeders: u32) -> bool {
        seeders < self.threshold
    }

    /// Widened tuning for a starved swarm, `None` when seeders suffice.
    pub fn adapt(&self, stats: &SwarmStats) -> Option<ConnectionTuning> {
        if !self.is_low_seeder(stats.seeders) {
            return None;
        }

        let floor = self.baseline.max_connections_per_torrent;
        let ceiling = self.widened_ceiling.max(floor);

        Some(ConnectionTuning {
            max_connections: self.baseline.max_connections,
            max_connections_per_torrent: stats.peers.saturating_mul(2).clamp(floor, ceiling),
            piece_timeout: self.widened_timeout,
            dht: true,
            trackers: true,
            local_discovery: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(peers: u32, seeders: u32) -> SwarmStats {
        SwarmStats {
            peers,
            seeders,
            ..Default::default()
        }
    }

    #[test]
    fn test_flag_matches_threshold() {
        let policy = LowSeederPolicy::from_config(&NetworkConfig::default());
        assert!(policy.is_low_seeder(0));
        assert!(policy.is_low_seeder(2));
        assert!(!policy.is_low_seeder(3));
        assert!(policy.adapt(&stats(40, 3)).is_none());
    }

    #[test]
    fn test_connection_ceiling_is_clamped() {
        let policy = LowSeederPolicy::from_config(&NetworkConfig::default());

        let few = policy.adapt(&stats(4, 1)).unwrap();
        assert_eq!(few.max_connections_per_torrent, 50);

        let some = policy.adapt(&stats(35, 1)).unwrap();
        assert_eq!(some.max_connections_per_torrent, 70);

        let many = policy.adapt(&stats(400, 0)).unwrap();
        assert_eq!(many.max_connections_per_torrent, 100);
        assert_eq!(many.piece_timeout, Duration::from_secs(60));
        assert!(many.dht && many.trackers && many.local_discovery);
    }

    #[test]
    fn test_adaptation_is_idempotent() {
        let policy = LowSeederPolicy::from_config(&NetworkConfig::default());
        let input = stats(30, 2);
        assert_eq!(policy.adapt(&input), policy.adapt(&input));
    }

    #[test]
    fn test_ceiling_below_baseline_does_not_panic() {
        let network = NetworkConfig {
            widened_connection_ceiling: 10,
            ..Default::default()
        };
        let policy = LowSeederPolicy::from_config(&network);
        assert_eq!(
            policy.adapt(&stats(100, 0)).unwrap().max_connections_per_torrent,
            50
        );
    }
}
