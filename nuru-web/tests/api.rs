//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use nuru_core::engine::simulated::{SimulatedEngine, content_bytes};
use nuru_core::storage::FsArtifactStore;
use nuru_core::{EventBus, InfoHash, NuruConfig, SessionManager};
use nuru_web::{AppState, build_router};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _dir: TempDir,
    router: Router,
    state: AppState,
    engine: Arc<SimulatedEngine>,
}

fn test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = NuruConfig::for_testing();
    let engine = Arc::new(SimulatedEngine::new(config.simulation.clone(), dir.path()));
    let manager = Arc::new(SessionManager::new(
        &config,
        engine.clone(),
        Arc::new(FsArtifactStore::new(dir.path())),
        EventBus::default(),
    ));
    let state = AppState::new(manager, config.streaming.clone());

    TestApp {
        _dir: dir,
        router: build_router(state.clone(), None),
        state,
        engine,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body.to_vec())
    }

    async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let (status, _, bytes) = self.send(builder.body(body).unwrap()).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn stream(&self, uri: &str, range: Option<&str>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Registers a 10 000-byte video plus a subtitle file and adds it.
    async fn add_video(&self, byte: u8) -> InfoHash {
        let info_hash = InfoHash::new([byte; 20]);
        self.engine.register_content(
            info_hash,
            vec![
                ("film.mp4".to_string(), 10_000),
                ("film.srt".to_string(), 2_000),
            ],
        );
        let magnet = format!("magnet:?xt=urn:btih:{info_hash}&dn=Film");
        let (status, body) = self
            .json(Method::POST, "/api/torrent", Some(json!({ "magnetLink": magnet })))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["infoHash"], info_hash.to_string());
        info_hash
    }
}

#[tokio::test]
async fn test_add_requires_magnet_link() {
    let app = test_app();

    let (status, body) = app.json(Method::POST, "/api/torrent", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Magnet link is required");

    let (status, _) = app
        .json(
            Method::POST,
            "/api/torrent",
            Some(json!({ "magnetLink": "magnet:?dn=nothing" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_is_idempotent_and_listed() {
    let app = test_app();
    let info_hash = app.add_video(1).await;

    let magnet = format!("magnet:?xt=urn:btih:{info_hash}");
    let (status, body) = app
        .json(Method::POST, "/api/torrent", Some(json!({ "magnetLink": magnet })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["infoHash"], info_hash.to_string());

    let (status, body) = app.json(Method::GET, "/api/torrents", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["torrents"][0]["infoHash"], info_hash.to_string());

    let (status, body) = app
        .json(Method::GET, &format!("/api/torrent/{info_hash}/files"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"][0]["name"], "film.mp4");
    assert_eq!(body["files"][0]["type"], "video");
    assert_eq!(body["files"][1]["length"], 2_000);
}

#[tokio::test]
async fn test_unknown_sessions_are_not_found() {
    let app = test_app();
    let missing = InfoHash::new([0xee; 20]);

    for (method, uri) in [
        (Method::GET, format!("/api/torrent/{missing}/files")),
        (Method::POST, format!("/api/playing/{missing}")),
        (Method::DELETE, format!("/api/torrent/{missing}")),
        (Method::GET, format!("/api/stream/{missing}")),
        (Method::GET, "/api/stream/not-a-hash".to_string()),
    ] {
        let (status, body) = app.json(method.clone(), &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        assert_eq!(body["error"], "Torrent not found");
    }
}

#[tokio::test]
async fn test_primary_stream_ranges() {
    let app = test_app();
    let info_hash = app.add_video(2).await;
    let uri = format!("/api/stream/{info_hash}");

    let (status, headers, body) = app.stream(&uri, Some("bytes=0-999")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-999/10000");
    assert_eq!(headers[header::CONTENT_LENGTH], "1000");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=3600");
    assert_eq!(
        headers[header::ETAG],
        format!("\"{info_hash}-0-999\"").as_str()
    );
    assert!(headers.contains_key("x-buffer-health"));
    assert!(headers.contains_key("x-adaptive-quality"));
    assert_eq!(body, content_bytes(0, 999));

    let (status, headers, body) = app.stream(&uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "10000");
    assert!(!headers.contains_key(header::CONTENT_RANGE));
    assert_eq!(body.len(), 10_000);

    let (status, headers, _) = app.stream(&uri, Some("bytes=10000-")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes */10000");

    let (status, _, _) = app.stream(&uri, Some("bytes=9-3")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = app.stream(&uri, Some("bytes=0-1,5-6")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_file_stream_by_index() {
    let app = test_app();
    let info_hash = app.add_video(3).await;

    let (status, headers, body) = app
        .stream(&format!("/api/stream/{info_hash}/file/1"), Some("bytes=1000-"))
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 1000-1999/2000");
    assert!(!headers.contains_key("x-buffer-health"));
    assert!(!headers.contains_key(header::ETAG));
    assert_eq!(body, content_bytes(10_000 + 1000, 10_000 + 1999));

    for index in ["2", "x"] {
        let (status, _, _) = app
            .stream(&format!("/api/stream/{info_hash}/file/{index}"), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_focus_and_removal() {
    let app = test_app();
    let info_hash = app.add_video(4).await;

    let (status, body) = app
        .json(Method::POST, &format!("/api/playing/{info_hash}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.state.manager.focused(), Some(info_hash));

    let (status, _) = app.json(Method::POST, "/api/playing/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.state.manager.focused(), None);

    app.json(Method::POST, &format!("/api/playing/{info_hash}"), None)
        .await;
    let (status, body) = app
        .json(Method::DELETE, &format!("/api/torrent/{info_hash}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["cleanupComplete"], true);
    assert!(body.get("errors").is_none());
    assert_eq!(app.state.manager.focused(), None);

    let (status, _) = app
        .json(Method::DELETE, &format!("/api/torrent/{info_hash}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let app = test_app();
    app.add_video(5).await;

    let (status, body) = app.json(Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["activeSessions"], 1);
    assert_eq!(body["openStreams"], 0);
    assert!(body["uptimeSeconds"].is_u64());
}

#[tokio::test]
async fn test_restart_announces_then_shuts_down() {
    let app = test_app();
    let mut events = app.state.manager.events().subscribe();

    let (status, body) = app.json(Method::POST, "/api/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let event = serde_json::to_value(events.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "serverRestarting");

    tokio::time::timeout(
        std::time::Duration::from_secs(2),
        app.state.lifecycle.shutdown_token().cancelled_owned(),
    )
    .await
    .unwrap();
}
