use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;

use super::AppState;

pub fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Short hex prefix of the token digest, safe to print in logs.
pub fn fingerprint(token: &str) -> String {
    hex::encode(digest(token))[..12].to_string()
}

/// Require `Authorization: Bearer <token>` when an admin token is configured.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.token_digest.as_ref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let verdict = match presented {
        None => Err((StatusCode::UNAUTHORIZED, "missing token")),
        Some(token) if digest(token) == *expected => Ok(()),
        Some(_) => Err((StatusCode::FORBIDDEN, "invalid token")),
    };

    match verdict {
        Ok(()) => next.run(request).await,
        Err((status, message)) => {
            warn!("Rejected request to {}: {}", request.uri().path(), message);
            reject(status, message)
        }
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
