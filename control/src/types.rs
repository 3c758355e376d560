use serde::{Deserialize, Serialize};

// ============================================================================
// Node Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub use_management_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddNodeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub use_management_key: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeResponse {
    pub node: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

// ============================================================================
// Management Key
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponse {
    pub public_key: String,
}

// ============================================================================
// Per-node Operations
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilenameRequest {
    #[serde(default)]
    pub filename: String,
}

/// Output of a push-config run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfigResponse {
    pub ok: bool,
    pub stdout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulledConfig {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub ok: bool,
    pub enable_out: String,
    pub test_out: String,
    /// Empty when the configuration test failed and reload was skipped.
    pub reload_out: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_base64: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushCertsRequest {
    #[serde(default)]
    pub files: Vec<CertFile>,
    pub target_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertResult {
    pub name: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCertsResponse {
    pub results: Vec<CertResult>,
}

// ============================================================================
// Fan-out
// ============================================================================

/// One logical operation issued against every node of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FanOutOperation {
    PushConfig {
        filename: String,
    },
    EnableAndReload {
        filename: String,
    },
    #[serde(rename_all = "camelCase")]
    PushCerts {
        files: Vec<CertFile>,
        target_dir: Option<String>,
    },
}

impl FanOutOperation {
    pub fn name(&self) -> &'static str {
        match self {
            FanOutOperation::PushConfig { .. } => "push-config",
            FanOutOperation::EnableAndReload { .. } => "enable-and-reload",
            FanOutOperation::PushCerts { .. } => "push-certs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOperationResult {
    pub node_id: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteOperationResult {
    pub fn failure(node_id: &str, error: impl Into<String>) -> Self {
        Self {
            node_id: node_id.to_string(),
            ok: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub nodes: Vec<String>,
    pub operation: FanOutOperation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub results: Vec<RemoteOperationResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    #[default]
    Push,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub action: SyncAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub ok: bool,
    /// Node host when the node resolved, otherwise the requested id.
    pub node: String,
    pub node_id: String,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub results: Vec<SyncResult>,
}

// ============================================================================
// Operation Log
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationLogEntry {
    pub timestamp: String,
    pub action: String,
    pub subject_host: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogResponse {
    pub entries: Vec<OrchestrationLogEntry>,
}

// ============================================================================
// Local Files
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentResponse {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteFileRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileResponse {
    pub ok: bool,
    pub name: String,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
