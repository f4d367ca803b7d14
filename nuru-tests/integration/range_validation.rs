//! Byte-exact range delivery under concurrency and slow readers.

use std::time::Duration;

use futures::future::join_all;
use nuru_core::NuruConfig;
use nuru_core::engine::simulated::content_bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};

use crate::common::TestServer;

#[tokio::test]
async fn test_concurrent_disjoint_ranges_are_exact() {
    let server = TestServer::start().await;
    let info_hash = server.add(0x31, "Parallel").await;
    let url = server.url(&format!("/api/stream/{info_hash}"));

    // Eight 128 KiB windows covering the whole 1 MiB video.
    let windows: Vec<(u64, u64)> = (0..8)
        .map(|i| (i * 131_072, (i + 1) * 131_072 - 1))
        .collect();

    let requests = windows.iter().map(|&(start, end)| {
        let request = server
            .client
            .get(&url)
            .header(RANGE, format!("bytes={start}-{end}"));
        async move {
            let response = request.send().await.unwrap();
            assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
            let bytes = response.bytes().await.unwrap();
            (start, end, bytes)
        }
    });

    for (start, end, bytes) in join_all(requests).await {
        assert_eq!(bytes.len() as u64, end - start + 1);
        assert_eq!(bytes.as_ref(), content_bytes(start, end).as_slice(), "{start}-{end}");
    }

    server.wait_for_open_streams(0).await;
    server.stop().await;
}

#[tokio::test]
async fn test_unaligned_ranges_cross_piece_boundaries() {
    let server = TestServer::start().await;
    let info_hash = server.add(0x32, "Unaligned").await;
    let url = server.url(&format!("/api/stream/{info_hash}"));

    // Piece length is 16 KiB in the testing profile.
    for (start, end) in [(16_383, 16_384), (1, 49_151), (1_048_000, 1_048_575)] {
        let response = server
            .client
            .get(&url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers()[CONTENT_LENGTH],
            (end - start + 1).to_string().as_str()
        );
        let bytes = response.bytes().await.unwrap();
        assert_eq!(bytes.as_ref(), content_bytes(start, end).as_slice());
    }

    // Open-ended range reads to the end of the file.
    let response = server
        .client
        .get(&url)
        .header(RANGE, "bytes=1048570-")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()[CONTENT_RANGE],
        "bytes 1048570-1048575/1048576"
    );
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        content_bytes(1_048_570, 1_048_575).as_slice()
    );

    server.stop().await;
}

#[tokio::test]
async fn test_stalled_reader_does_not_block_others() {
    let mut config = NuruConfig::for_testing();
    config.simulation.content_size = 64 * 1024 * 1024;
    config.simulation.download_speed = 4 * 1024 * 1024;
    let server = TestServer::start_with(config).await;
    let info_hash = server.add(0x33, "Stall").await;
    let url = server.url(&format!("/api/stream/{info_hash}"));

    // Held open and never drained past the first chunk.
    let mut stalled = server.client.get(&url).send().await.unwrap();
    assert!(stalled.chunk().await.unwrap().is_some());

    let start = 32 * 1024 * 1024;
    let end = start + 32_767;
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        server
            .client
            .get(&url)
            .header(RANGE, format!("bytes={start}-{end}"))
            .send(),
    )
    .await
    .unwrap()
    .unwrap();
    let bytes = response.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), content_bytes(start, end).as_slice());

    server.wait_for_open_streams(1).await;

    drop(stalled);
    server.wait_for_open_streams(0).await;
    server.stop().await;
}
