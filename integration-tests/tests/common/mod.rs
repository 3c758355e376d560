use nginx_fleet_control::api::{create_router, AppState};
use nginx_fleet_control::config::FleetConfig;
use nginx_fleet_control::remote::fake::FakeFleet;
use nginx_fleet_control::services::{ManagementKeyManager, OperationLog};
use nginx_fleet_control::types::{AddNodeResponse, Node};
use reqwest::{Method, RequestBuilder};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// A control plane served in-process on an ephemeral port, talking to a
/// scripted fleet instead of real SSH hosts.
pub struct TestFleet {
    pub port: u16,
    pub fleet: FakeFleet,
    token: Option<String>,
    http: reqwest::Client,
    server: JoinHandle<()>,
    log: OperationLog,
    data_dir: TempDir,
}

impl TestFleet {
    pub async fn new() -> Self {
        Self::start(TempDir::new().expect("Failed to create temp dir"), FakeFleet::new(), None).await
    }

    pub async fn with_token(token: &str) -> Self {
        Self::start(
            TempDir::new().expect("Failed to create temp dir"),
            FakeFleet::new(),
            Some(token.to_string()),
        )
        .await
    }

    async fn start(data_dir: TempDir, fleet: FakeFleet, token: Option<String>) -> Self {
        let mut config = FleetConfig::new(data_dir.path());
        config.admin_token = token.clone();

        let keys = Arc::new(ManagementKeyManager::new(
            config.key_dir(),
            Duration::from_secs(60),
        ));
        let state = AppState::new(&config, keys, fleet.connector()).expect("Failed to build state");
        let log = state.log.clone();
        let app = create_router(Arc::new(state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to port 0");
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Server failed");
        });

        Self {
            port,
            fleet,
            token,
            http: reqwest::Client::new(),
            server,
            log,
            data_dir,
        }
    }

    /// Stop serving and start again over the same data directory and fleet.
    pub async fn restart(self) -> Self {
        self.server.abort();
        let _ = self.server.await;
        self.log.flush().await;
        Self::start(self.data_dir, self.fleet, self.token).await
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Request builder carrying the admin token, if one is configured.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub async fn add_node(&self, name: &str, host: &str) -> Node {
        let resp = self
            .request(Method::POST, "/api/nodes")
            .json(&serde_json::json!({ "name": name, "host": host }))
            .send()
            .await
            .expect("Failed to add node");
        assert!(resp.status().is_success(), "add node: {}", resp.status());
        resp.json::<AddNodeResponse>()
            .await
            .expect("Failed to parse response")
            .node
    }

    pub async fn put_file(&self, name: &str, content: &str) {
        let resp = self
            .request(Method::PUT, &format!("/api/files/{}", name))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .expect("Failed to upload file");
        assert!(resp.status().is_success(), "put file: {}", resp.status());
    }
}
