use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use super::{json_body, AppState};
use crate::{
    error::FleetError,
    types::{FileContentResponse, ListFilesResponse, WriteFileRequest, WriteFileResponse},
};

/// GET /api/files - Local config files
pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListFilesResponse>, FleetError> {
    let files = state.configs.list().await?;
    Ok(Json(ListFilesResponse { files }))
}

/// GET /api/files/:name - Read a local config file
pub async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FileContentResponse>, FleetError> {
    let bytes = state.configs.read(&name).await?;
    Ok(Json(FileContentResponse {
        name,
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

/// PUT /api/files/:name - Create or replace a local config file
pub async fn write_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<WriteFileRequest>, JsonRejection>,
) -> Result<Json<WriteFileResponse>, FleetError> {
    let req = json_body(payload)?;
    let name = state.configs.write(&name, req.content.as_bytes()).await?;
    info!("Local config written: {} ({} bytes)", name, req.content.len());
    Ok(Json(WriteFileResponse { ok: true, name }))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::app;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_files_roundtrip() {
        let app = app(None);

        let (status, body) = app
            .call("PUT", "/api/files/b.conf", Some(json!({ "content": "server { }" })), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "name": "b.conf" }));
        app.call("PUT", "/api/files/a.conf", Some(json!({ "content": "" })), None)
            .await;

        let (_, body) = app.call("GET", "/api/files", None, None).await;
        assert_eq!(body["files"], json!(["a.conf", "b.conf"]));

        let (status, body) = app.call("GET", "/api/files/b.conf", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "server { }");
    }

    #[tokio::test]
    async fn test_missing_and_unsafe_names() {
        let app = app(None);

        let (status, body) = app.call("GET", "/api/files/none.conf", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "local config not found");

        let (status, _) = app
            .call("PUT", "/api/files/a%3Bb", Some(json!({ "content": "x" })), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
