//! Restart and shutdown as seen from outside the process.

use std::time::Duration;

use nuru_web::{RESTART_EXIT_CODE, ServerExit};
use reqwest::StatusCode;
use serde_json::json;

use crate::common::TestServer;

#[tokio::test]
async fn test_restart_returns_restart_exit() {
    let server = TestServer::start().await;
    server.add(0x21, "Before").await;
    let mut events = server.state.manager.events().subscribe();

    let (status, body) = server.post_json("/api/restart", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);

    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "serverRestarting");

    let manager = std::sync::Arc::clone(&server.state.manager);
    let exit = server.join().await;
    assert_eq!(exit, ServerExit::RestartRequested);
    assert_eq!(exit.exit_code(), RESTART_EXIT_CODE);
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let mut config = nuru_core::NuruConfig::for_testing();
    config.simulation.content_size = 64 * 1024 * 1024;
    config.simulation.download_speed = 4 * 1024 * 1024;
    let server = TestServer::start_with(config).await;
    let info_hash = server.add(0x22, "Long").await;

    let mut response = server
        .client
        .get(server.url(&format!("/api/stream/{info_hash}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.chunk().await.unwrap().is_some());

    let streams = server.state.streaming.clone();
    let exit = server.stop().await;
    assert_eq!(exit, ServerExit::Stopped);
    assert_eq!(exit.exit_code(), 0);

    // The body is cut short: either an error or an early end.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = 0usize;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => received += chunk.len(),
                Ok(None) | Err(_) => return received,
            }
        }
    })
    .await
    .unwrap();
    assert!(drained < 64 * 1024 * 1024);

    tokio::time::timeout(Duration::from_secs(2), async {
        while streams.open_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_health_reports_shutdown_state() {
    let server = TestServer::start().await;

    let (status, body) = server.get_json("/api/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["openStreams"], 0);
    assert_eq!(body["activeSessions"], 0);

    assert_eq!(server.stop().await, ServerExit::Stopped);
}
