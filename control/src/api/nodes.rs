use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{json_body, AppState};
use crate::{
    error::FleetError,
    services::node_registry::DEFAULT_PORT,
    types::{
        AddNodeRequest, AddNodeResponse, FilenameRequest, ListNodesResponse, Node, OkResponse,
        PulledConfig, PushCertsRequest, PushCertsResponse, PushConfigResponse, ReloadOutcome,
    },
};

fn lookup(state: &AppState, id: &str) -> Result<Node, FleetError> {
    state
        .registry
        .get(id)
        .ok_or_else(|| FleetError::NotFound("node not found".to_string()))
}

fn require_filename(req: FilenameRequest) -> Result<String, FleetError> {
    let filename = req.filename.trim();
    if filename.is_empty() {
        return Err(FleetError::Validation("filename required".to_string()));
    }
    Ok(filename.to_string())
}

/// GET /api/nodes - List all nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<ListNodesResponse> {
    Json(ListNodesResponse {
        nodes: state.registry.list(),
    })
}

/// POST /api/nodes - Register a node
pub async fn add_node(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddNodeRequest>, JsonRejection>,
) -> Result<Json<AddNodeResponse>, FleetError> {
    let req = json_body(payload)?;
    info!("Adding node: name={}, host={}", req.name, req.host);

    let node = state
        .registry
        .add(
            &req.name,
            &req.host,
            req.port.unwrap_or(DEFAULT_PORT),
            req.user.as_deref().unwrap_or_default(),
            req.use_management_key.unwrap_or(true),
        )
        .await?;

    state
        .log
        .append("node:add", &node.host, &format!("id={} name={}", node.id, node.name));

    Ok(Json(AddNodeResponse { node }))
}

/// DELETE /api/nodes/:id - Remove a node (idempotent)
pub async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, FleetError> {
    let host = state.registry.get(&id).map(|n| n.host);
    if state.registry.remove(&id).await? {
        info!("Node removed: node_id={}", id);
        state
            .log
            .append("node:remove", host.as_deref().unwrap_or("-"), &format!("id={}", id));
    }
    Ok(Json(OkResponse { ok: true }))
}

/// POST /api/nodes/:id/push-config - Upload a local config to the node
///
/// A push that ran but reported an error answers 500 with the command output.
pub async fn push_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<FilenameRequest>, JsonRejection>,
) -> Result<Response, FleetError> {
    let node = lookup(&state, &id)?;
    let filename = require_filename(json_body(payload)?)?;

    let outcome = state.orchestrator.push(&node, &filename).await?;
    if outcome.ok {
        Ok(Json(PushConfigResponse {
            ok: true,
            stdout: outcome.stdout,
            stderr: None,
        })
        .into_response())
    } else {
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(PushConfigResponse {
                ok: false,
                stdout: outcome.stdout,
                stderr: Some(outcome.stderr),
            }),
        )
            .into_response())
    }
}

/// POST /api/nodes/:id/pull-config - Fetch the node's copy of a config
pub async fn pull_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<FilenameRequest>, JsonRejection>,
) -> Result<Json<PulledConfig>, FleetError> {
    let node = lookup(&state, &id)?;
    let filename = require_filename(json_body(payload)?)?;

    let pulled = state
        .orchestrator
        .pull(&node, &filename)
        .await
        .map_err(|e| match e {
            FleetError::Validation(_) => e,
            other => FleetError::Transfer(format!("failed to fetch remote file: {}", other)),
        })?;
    Ok(Json(pulled))
}

/// POST /api/nodes/:id/enable-and-reload - Enable, test and reload nginx
pub async fn enable_and_reload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<FilenameRequest>, JsonRejection>,
) -> Result<Json<ReloadOutcome>, FleetError> {
    let node = lookup(&state, &id)?;
    let filename = require_filename(json_body(payload)?)?;

    let outcome = state.orchestrator.enable_and_reload(&node, &filename).await?;
    Ok(Json(outcome))
}

/// POST /api/nodes/:id/push-certs - Install certificate files
pub async fn push_certs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<PushCertsRequest>, JsonRejection>,
) -> Result<Json<PushCertsResponse>, FleetError> {
    let node = lookup(&state, &id)?;
    let req = json_body(payload)?;

    let results = state
        .orchestrator
        .push_certs(&node, &req.files, req.target_dir.as_deref())
        .await?;
    Ok(Json(PushCertsResponse { results }))
}
