use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::ErrorResponse;

#[derive(Clone)]
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
    token: Option<String>,
    user_agent: String,
    retries: u32,
}

impl Client {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        retries: u32,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid base URL")?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            token,
            user_agent: format!("nginx-fleet/{}", env!("CARGO_PKG_VERSION")),
            retries,
        })
    }

    pub fn build_url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).with_context(|| {
            format!(
                "Failed to join base_url={} with path={}",
                self.base_url, path
            )
        })
    }

    /// Send a request and pretty-print the JSON response.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        let bytes = self.send_json_bytes(method, path, body).await?;
        print_bytes(&bytes)?;
        Ok(())
    }

    /// Send a request and decode the JSON response into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let bytes = self.send_json_bytes(method, path, body).await?;
        serde_json::from_slice(&bytes).context("Failed to decode response")
    }

    pub async fn send_json_bytes(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let url = self.build_url(path)?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let req_id = Uuid::new_v4().to_string();
            let mut req = self.http.request(method.clone(), url.clone());
            req = req.header("user-agent", &self.user_agent);
            req = req.header("x-request-id", &req_id);

            if let Some(token) = &self.token {
                req = req.header("authorization", format!("Bearer {}", token));
            }
            if let Some(b) = &body {
                req = req.json(b);
            }

            debug!("HTTP {} {} (attempt {})", method, url, attempt);
            let resp = req.send().await.context("Request failed")?;
            let status = resp.status();

            if status.is_success() {
                let bytes = resp.bytes().await.unwrap_or_default().to_vec();
                return Ok(bytes);
            }

            let bytes = resp.bytes().await.unwrap_or_default();
            let err = serde_json::from_slice::<ErrorResponse>(&bytes).ok();

            if attempt <= self.retries && should_retry(&method, status) {
                tokio::time::sleep(retry_sleep(attempt)).await;
                continue;
            }

            match err.as_ref().and_then(ErrorResponse::message) {
                Some(message) => anyhow::bail!(
                    "HTTP {} {} failed: status={} error={} request_id={}",
                    method,
                    url.path(),
                    status.as_u16(),
                    message,
                    req_id
                ),
                None => anyhow::bail!(
                    "HTTP {} {} failed: status={} body={}",
                    method,
                    url.path(),
                    status.as_u16(),
                    String::from_utf8_lossy(&bytes)
                ),
            }
        }
    }
}

const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_');

/// Encode one URL path segment (node id or file name).
pub fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Only idempotent requests are retried on server errors; a failed push is
/// not replayed.
fn should_retry(method: &Method, status: StatusCode) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    if status.is_server_error() {
        return matches!(*method, Method::GET | Method::DELETE);
    }
    false
}

fn retry_sleep(attempt: u32) -> Duration {
    Duration::from_millis(300 * u64::from(attempt))
}

fn print_bytes(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        println!("{}", r#"{"ok":true}"#);
        return Ok(());
    }
    if let Ok(v) = serde_json::from_slice::<serde_json::Value>(bytes) {
        println!("{}", serde_json::to_string_pretty(&v)?);
    } else {
        println!("{}", String::from_utf8_lossy(bytes));
    }
    Ok(())
}
