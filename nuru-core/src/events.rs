//! Push notifications for connected clients.
//!
//! Events go out over a broadcast channel; each subscriber (one per
//! WebSocket) receives every event published after it subscribed. Slow
//! subscribers lag and skip ahead rather than block publishers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::{FileEntry, SessionMetrics, SessionSnapshot};
use crate::torrent::InfoHash;

const DEFAULT_CAPACITY: usize = 256;

/// Event envelope, serialized as `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum NuruEvent {
    /// Sent to each new subscriber before anything else.
    CurrentTorrents(Vec<SessionSnapshot>),
    TorrentReady(TorrentReady),
    TorrentProgress(TorrentProgress),
    TorrentError(TorrentError),
    TorrentRemoved(TorrentRemoved),
    ServerRestarting(ServerRestarting),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentReady {
    pub info_hash: InfoHash,
    pub name: String,
    pub primary_file: FileEntry,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentProgress {
    pub info_hash: InfoHash,
    #[serde(flatten)]
    pub metrics: SessionMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentError {
    pub info_hash: InfoHash,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentRemoved {
    pub info_hash: InfoHash,
    pub cleanup_complete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRestarting {
    pub message: String,
}

/// Fan-out of [`NuruEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NuruEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes to every current subscriber; returns how many there were.
    pub fn publish(&self, event: NuruEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NuruEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let event = NuruEvent::TorrentRemoved(TorrentRemoved {
            info_hash: InfoHash::new([0xab; 20]),
            cleanup_complete: true,
            errors: Vec::new(),
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "torrentRemoved");
        assert_eq!(json["data"]["infoHash"], "ab".repeat(20));
        assert_eq!(json["data"]["cleanupComplete"], true);
        assert!(json["data"].get("errors").is_none());
    }

    #[test]
    fn test_progress_flattens_metrics() {
        let event = NuruEvent::TorrentProgress(TorrentProgress {
            info_hash: InfoHash::new([1; 20]),
            metrics: SessionMetrics {
                download_speed: 2048,
                buffer_health: 0.5,
                low_seeder: true,
                ..Default::default()
            },
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "torrentProgress");
        assert_eq!(json["data"]["downloadSpeed"], 2048);
        assert_eq!(json["data"]["bufferHealth"], 0.5);
        assert_eq!(json["data"]["lowSeeder"], true);
        assert_eq!(json["data"]["quality"], "very-low");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let event = NuruEvent::ServerRestarting(ServerRestarting {
            message: "bye".to_string(),
        });
        assert_eq!(bus.publish(event.clone()), 0);

        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
