pub mod auth;
pub mod cluster;
pub mod files;
pub mod nodes;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::remote::Connector;
use crate::services::{
    ConfigOrchestrator, FanOutExecutor, LocalConfigStore, ManagementKeyManager, NodeRegistry,
    OperationLog,
};
use crate::types::HealthResponse;

pub struct AppState {
    pub registry: NodeRegistry,
    pub keys: Arc<ManagementKeyManager>,
    pub configs: LocalConfigStore,
    pub log: OperationLog,
    pub orchestrator: Arc<ConfigOrchestrator>,
    pub fanout: FanOutExecutor,
    /// SHA-256 of the admin token; `None` leaves the API open.
    pub token_digest: Option<[u8; 32]>,
}

impl AppState {
    /// Wire every component from `config`. Fails if the node registry
    /// document exists but cannot be parsed.
    pub fn new(
        config: &FleetConfig,
        keys: Arc<ManagementKeyManager>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, FleetError> {
        let registry = NodeRegistry::open(config.nodes_file())?;
        let configs = LocalConfigStore::new(config.config_dir.clone());
        let log = OperationLog::new(config.log_file());
        let orchestrator = Arc::new(ConfigOrchestrator::new(
            connector,
            configs.clone(),
            config.remote.clone(),
            log.clone(),
        ));
        let fanout = FanOutExecutor::new(registry.clone(), orchestrator.clone(), log.clone());

        Ok(Self {
            registry,
            keys,
            configs,
            log,
            orchestrator,
            fanout,
            token_digest: config.admin_token.as_deref().map(auth::digest),
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let require_token = middleware::from_fn_with_state(state.clone(), auth::require_token);

    let gated = Router::new()
        // Management key
        .route("/api/cluster/key", get(cluster::get_key).post(cluster::get_key))
        // Node management
        .route("/api/nodes", get(nodes::list_nodes).post(nodes::add_node))
        .route("/api/nodes/:id", delete(nodes::remove_node))
        .route("/api/nodes/:id/push-config", post(nodes::push_config))
        .route("/api/nodes/:id/pull-config", post(nodes::pull_config))
        .route("/api/nodes/:id/enable-and-reload", post(nodes::enable_and_reload))
        .route("/api/nodes/:id/push-certs", post(nodes::push_certs))
        // Fan-out
        .route("/api/cluster/sync", post(cluster::sync))
        .route("/api/cluster/run", post(cluster::run))
        .route("/api/cluster/log", get(cluster::get_log))
        .route_layer(require_token.clone());

    Router::new()
        // Health check
        .route("/health", get(health))
        // Local config files; only writes are gated
        .route("/api/files", get(files::list_files))
        .route(
            "/api/files/:name",
            get(files::read_file).merge(put(files::write_file).route_layer(require_token)),
        )
        .merge(gated)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Unwrap a JSON body, turning extractor rejections into 400s with an
/// `{error}` body.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, FleetError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| FleetError::Validation(rejection.body_text()))
}
