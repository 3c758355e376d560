use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::RemoteOperationResult;

/// Errors produced by the orchestration core.
#[derive(Error, Debug)]
pub enum FleetError {
    /// Bad input: missing required field or an unsafe name.
    #[error("{0}")]
    Validation(String),

    /// Node, local file or remote resource absent.
    #[error("{0}")]
    NotFound(String),

    /// Management key missing or rejected by the remote host.
    #[error("{0}")]
    Authentication(String),

    /// File copy to or from a node failed.
    #[error("{0}")]
    Transfer(String),

    /// The remote command could not be invoked at all.
    ///
    /// A command that ran and exited non-zero is not an error; its exit code
    /// is reported in the result instead.
    #[error("{0}")]
    Execution(String),

    #[error("{0}")]
    KeyGeneration(String),

    /// Local persistence failed (registry document, temp files).
    #[error("{0}")]
    Storage(String),
}

impl FleetError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FleetError::Validation(_) => StatusCode::BAD_REQUEST,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Failed entries of a fan-out batch. The batch itself still succeeds; this is
/// only used to report what went wrong.
#[derive(Error, Debug)]
#[error("{} of {total} node operation(s) failed", failures.len())]
pub struct AggregateError {
    pub total: usize,
    /// `(node_id, error text)` per failed entry, in batch order.
    pub failures: Vec<(String, String)>,
}

impl AggregateError {
    pub fn from_results(results: &[RemoteOperationResult]) -> Option<Self> {
        let failures: Vec<(String, String)> = results
            .iter()
            .filter(|r| !r.ok)
            .map(|r| {
                let reason = r
                    .error
                    .clone()
                    .or_else(|| (!r.stderr.is_empty()).then(|| r.stderr.trim().to_string()))
                    .unwrap_or_else(|| match r.exit_code {
                        Some(code) => format!("exit code {}", code),
                        None => "failed".to_string(),
                    });
                (r.node_id.clone(), reason)
            })
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(Self {
                total: results.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            FleetError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            FleetError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            FleetError::Transfer("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_aggregate_only_collects_failures() {
        let results = vec![
            RemoteOperationResult {
                node_id: "a".into(),
                ok: true,
                stdout: "done".into(),
                stderr: String::new(),
                exit_code: Some(0),
                error: None,
            },
            RemoteOperationResult::failure("b", "node not found"),
        ];

        let agg = AggregateError::from_results(&results).unwrap();
        assert_eq!(agg.total, 2);
        assert_eq!(agg.failures, vec![("b".to_string(), "node not found".to_string())]);
        assert_eq!(agg.to_string(), "1 of 2 node operation(s) failed");

        assert!(AggregateError::from_results(&results[..1]).is_none());
    }
}
