//! Live server harness shared by the integration and end-to-end suites.
//!
//! Binds `127.0.0.1:0`, wires a simulated engine into a session manager
//! and runs the real server loop, so requests cross a TCP socket.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nuru_core::engine::SimulatedEngine;
use nuru_core::sampler::Sampler;
use nuru_core::storage::FsArtifactStore;
use nuru_core::{EventBus, InfoHash, NuruConfig, SessionManager};
use nuru_web::{AppState, ServerExit, run_server};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub address: SocketAddr,
    pub client: reqwest::Client,
    pub engine: Arc<SimulatedEngine>,
    pub state: AppState,
    pub download_root: TempDir,
    server: JoinHandle<io::Result<ServerExit>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(NuruConfig::for_testing()).await
    }

    pub async fn start_with(mut config: NuruConfig) -> Self {
        let download_root = TempDir::new().unwrap();
        config.storage.download_root = download_root.path().to_path_buf();

        let engine = Arc::new(SimulatedEngine::new(
            config.simulation.clone(),
            download_root.path(),
        ));
        let manager = Arc::new(SessionManager::new(
            &config,
            engine.clone(),
            Arc::new(FsArtifactStore::new(download_root.path())),
            EventBus::default(),
        ));
        let state = AppState::new(Arc::clone(&manager), config.streaming.clone());

        let shutdown = state.lifecycle.shutdown_token();
        manager.spawn_engine_listener(shutdown.clone());
        Sampler::new(Arc::clone(&manager), &config).spawn(shutdown);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(run_server(listener, state.clone(), None));

        Self {
            address,
            client: reqwest::Client::new(),
            engine,
            state,
            download_root,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    pub async fn get_json(&self, path: &str) -> (u16, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    pub async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    pub async fn delete_json(&self, path: &str) -> (u16, Value) {
        let response = self.client.delete(self.url(path)).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// Adds a torrent named `name` through the API.
    pub async fn add(&self, byte: u8, name: &str) -> InfoHash {
        let info_hash = InfoHash::new([byte; 20]);
        let magnet = format!("magnet:?xt=urn:btih:{info_hash}&dn={name}");
        let (status, body) = self
            .post_json("/api/torrent", json!({ "magnetLink": magnet }))
            .await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["infoHash"], info_hash.to_string());
        info_hash
    }

    /// Polls `/api/health` until `openStreams` reaches `expected`.
    pub async fn wait_for_open_streams(&self, expected: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (_, body) = self.get_json("/api/health").await;
                if body["openStreams"] == expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("openStreams never reached {expected}"));
    }

    /// Waits for the server loop to return.
    pub async fn join(self) -> ServerExit {
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }

    pub async fn stop(self) -> ServerExit {
        self.state.lifecycle.request_shutdown();
        self.join().await
    }
}
