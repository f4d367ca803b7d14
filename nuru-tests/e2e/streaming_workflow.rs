//! Add, watch, seek and remove a torrent the way the player page does.

use std::time::Duration;

use nuru_core::engine::simulated::content_bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use serde_json::json;

use crate::common::TestServer;

const VIDEO_LENGTH: u64 = 1024 * 1024;

#[tokio::test]
async fn test_complete_viewing_session() {
    let server = TestServer::start().await;
    let info_hash = server.add(0x11, "Show").await;

    // Metadata resolves without delay in the testing profile.
    let (status, body) = server.get_json("/api/torrents").await;
    assert_eq!(status, 200);
    assert_eq!(body["total"], 1);
    let torrent = &body["torrents"][0];
    assert_eq!(torrent["name"], "Show");
    assert_eq!(torrent["ready"], true);
    assert_eq!(torrent["primaryFile"]["name"], "Show.mp4");

    let (status, body) = server
        .get_json(&format!("/api/torrent/{info_hash}/files"))
        .await;
    assert_eq!(status, 200);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    assert_eq!(files[0]["length"], VIDEO_LENGTH);

    let (status, _) = server
        .post_json(&format!("/api/playing/{info_hash}"), json!({}))
        .await;
    assert_eq!(status, 200);

    // Opening request, then a seek into the middle of the file.
    for (range, start, end) in [
        ("bytes=0-65535", 0, 65_535),
        ("bytes=524288-589823", 524_288, 589_823),
    ] {
        let response = server
            .client
            .get(server.url(&format!("/api/stream/{info_hash}")))
            .header(RANGE, range)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[CONTENT_RANGE],
            format!("bytes {start}-{end}/{VIDEO_LENGTH}").as_str()
        );
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
        let bytes = response.bytes().await.unwrap();
        assert_eq!(bytes.as_ref(), content_bytes(start, end).as_slice());
    }

    // Subtitle track by index, whole file.
    let response = server
        .client
        .get(server.url(&format!("/api/stream/{info_hash}/file/1")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_LENGTH], "24576");
    let bytes = response.bytes().await.unwrap();
    assert_eq!(
        bytes.as_ref(),
        content_bytes(VIDEO_LENGTH, VIDEO_LENGTH + 24_575).as_slice()
    );

    server.wait_for_open_streams(0).await;

    let (status, body) = server.delete_json(&format!("/api/torrent/{info_hash}")).await;
    assert_eq!(status, 200);
    assert_eq!(body["cleanupComplete"], true);

    let (_, body) = server.get_json("/api/torrents").await;
    assert_eq!(body["total"], 0);
    let (_, body) = server.get_json("/api/health").await;
    assert_eq!(body["activeSessions"], 0);
    assert!(server.engine.torrent(info_hash).is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_range_errors_over_the_wire() {
    let server = TestServer::start().await;
    let info_hash = server.add(0x12, "Errors").await;
    let url = server.url(&format!("/api/stream/{info_hash}"));

    let response = server
        .client
        .get(&url)
        .header(RANGE, "bytes=2000000-")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes */{VIDEO_LENGTH}").as_str()
    );

    for range in ["bytes=500-100", "items=0-1", "bytes=0-1,4-5"] {
        let response = server.client.get(&url).header(RANGE, range).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{range}");
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    // Suffix longer than the file is clamped to the whole file.
    let response = server
        .client
        .get(&url)
        .header(RANGE, "bytes=-99999999")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        format!("bytes 0-{}/{VIDEO_LENGTH}", VIDEO_LENGTH - 1).as_str()
    );
    drop(response);

    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_releases_stream() {
    let mut config = nuru_core::NuruConfig::for_testing();
    config.simulation.content_size = 64 * 1024 * 1024;
    config.simulation.download_speed = 4 * 1024 * 1024;
    let server = TestServer::start_with(config).await;
    let info_hash = server.add(0x13, "Slow").await;

    let mut response = server
        .client
        .get(server.url(&format!("/api/stream/{info_hash}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.chunk().await.unwrap().is_some());
    server.wait_for_open_streams(1).await;

    drop(response);
    server.wait_for_open_streams(0).await;

    // The session survives the disconnect.
    let (status, _) = server
        .get_json(&format!("/api/torrent/{info_hash}/files"))
        .await;
    assert_eq!(status, 200);

    tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .unwrap();
}
