//! Several sessions sharing one server: focus hand-off and isolation.

use nuru_core::engine::PieceTier;
use nuru_core::engine::simulated::content_bytes;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use serde_json::json;

use crate::common::TestServer;

// Testing profile: 1 MiB video in 16 KiB pieces, then subtitles and a sample.
const LAST_VIDEO_PIECE: u32 = 63;
const SAMPLE_PIECE: u32 = 66;

#[tokio::test]
async fn test_focus_moves_between_sessions() {
    let server = TestServer::start().await;
    let first = server.add(0x41, "First").await;
    let second = server.add(0x42, "Second").await;
    let first_torrent = server.engine.torrent(first).unwrap();
    let second_torrent = server.engine.torrent(second).unwrap();

    let (status, _) = server
        .post_json(&format!("/api/playing/{first}"), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(first_torrent.piece_tier(0), Some(PieceTier::Urgent));
    assert_eq!(
        first_torrent.piece_tier(LAST_VIDEO_PIECE),
        Some(PieceTier::High)
    );
    assert_eq!(
        first_torrent.piece_tier(SAMPLE_PIECE),
        Some(PieceTier::Suppressed)
    );
    assert_eq!(second_torrent.piece_tier(0), Some(PieceTier::Normal));

    let (status, _) = server
        .post_json(&format!("/api/playing/{second}"), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(second_torrent.piece_tier(0), Some(PieceTier::Urgent));
    assert_eq!(first_torrent.piece_tier(0), Some(PieceTier::Normal));
    assert_eq!(first_torrent.piece_tier(SAMPLE_PIECE), None);

    let (_, body) = server.get_json("/api/torrents").await;
    let focused: Vec<_> = body["torrents"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|torrent| torrent["focused"] == true)
        .map(|torrent| torrent["infoHash"].clone())
        .collect();
    assert_eq!(focused, vec![json!(second.to_string())]);

    let (status, _) = server.post_json("/api/playing/stop", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(second_torrent.piece_tier(0), Some(PieceTier::Normal));

    server.stop().await;
}

#[tokio::test]
async fn test_removing_one_session_leaves_the_other_streaming() {
    let server = TestServer::start().await;
    let kept = server.add(0x43, "Kept").await;
    let removed = server.add(0x44, "Removed").await;

    let (status, body) = server.delete_json(&format!("/api/torrent/{removed}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert!(
        !server
            .download_root
            .path()
            .join(removed.to_string())
            .exists()
    );

    let response = server
        .client
        .get(server.url(&format!("/api/stream/{removed}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = server
        .client
        .get(server.url(&format!("/api/stream/{kept}")))
        .header(RANGE, "bytes=0-1023")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        content_bytes(0, 1023).as_slice()
    );

    let (_, health) = server.get_json("/api/health").await;
    assert_eq!(health["activeSessions"], 1);

    server.stop().await;
}

#[tokio::test]
async fn test_adding_twice_keeps_one_session() {
    let server = TestServer::start().await;
    let info_hash = server.add(0x45, "Twice").await;

    let (status, body) = server
        .post_json(
            "/api/torrent",
            json!({ "magnetLink": info_hash.to_string() }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Torrent already added");

    let (_, body) = server.get_json("/api/torrents").await;
    assert_eq!(body["total"], 1);

    server.stop().await;
}
