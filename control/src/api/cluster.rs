use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{json_body, AppState};
use crate::{
    error::FleetError,
    services::fanout,
    types::{
        KeyResponse, LogResponse, RunRequest, RunResponse, SyncAction, SyncRequest, SyncResponse,
    },
};

const DEFAULT_LOG_LIMIT: usize = 100;

/// GET|POST /api/cluster/key - Public half of the management key,
/// generated on first use
pub async fn get_key(State(state): State<Arc<AppState>>) -> Result<Json<KeyResponse>, FleetError> {
    let generated = !state.keys.has_key();
    let public_key = state.keys.ensure_key().await?;
    if generated {
        info!("Management key generated");
        state.log.append("cluster:key", "-", "generated");
    }
    Ok(Json(KeyResponse { public_key }))
}

/// POST /api/cluster/sync - Push files to nodes
pub async fn sync(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, FleetError> {
    let req = json_body(payload)?;
    let results = match req.action {
        SyncAction::Push => state.fanout.sync(&req.files, &req.nodes).await?,
    };

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        warn!("Cluster sync: {} of {} push(es) failed", failed, results.len());
    }
    Ok(Json(SyncResponse { results }))
}

/// POST /api/cluster/run - Run one operation on many nodes
pub async fn run(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, FleetError> {
    let req = json_body(payload)?;
    if req.nodes.is_empty() {
        return Err(FleetError::Validation("no nodes".to_string()));
    }

    let results = state.fanout.run(&req.nodes, &req.operation).await;
    if let Some(failures) = fanout::failures(&results) {
        warn!("{}: {}", req.operation.name(), failures);
        for (node_id, reason) in &failures.failures {
            warn!("  {}: {}", node_id, reason);
        }
    }
    Ok(Json(RunResponse { results }))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    limit: Option<usize>,
}

/// GET /api/cluster/log - Recent operation log entries
pub async fn get_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogResponse>, FleetError> {
    let entries = state
        .log
        .recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await?;
    Ok(Json(LogResponse { entries }))
}
