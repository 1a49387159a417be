//! HTTP client for the remote tool server.
//!
//! Wire protocol:
//! - `GET  {base}/tools`          → `[{name, description, parameters_schema}]`
//! - `POST {base}/tools/{name}`   → `{success, result?, error?}`
//! - `GET  {base}/health`         → `{status: "ok"|"degraded"|"down"}`

use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::contracts::{
    BackendError, BackendResult, Health, ToolCallOutcome, ToolDefinition, ToolServer,
};

/// Remote tool server reached over HTTP/JSON
pub struct HttpToolServer {
    base_url: String,
    client: reqwest::Client,
    retries: u32,
}

#[derive(Debug, Deserialize)]
struct WireCallResponse {
    success: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireHealth {
    status: String,
}

impl HttpToolServer {
    pub fn new(base_url: &str, timeout_ms: u64, retries: u32) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify(err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(err.to_string())
        } else if err.is_connect() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Protocol(err.to_string())
        }
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> BackendResult<reqwest::Response> {
        let mut last_err = None;

        for attempt in 0..=self.retries {
            if attempt > 0 {
                // 100ms, 200ms, 400ms, ...
                let backoff = Duration::from_millis(100 * (1u64 << (attempt - 1).min(6)));
                tokio::time::sleep(backoff).await;
                debug!(url, attempt, "retrying tool server call");
            }

            match self.client.post(url).json(body).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        last_err = Some(BackendError::Unavailable(format!("HTTP {status}")));
                        continue;
                    }
                    return Err(BackendError::Protocol(format!("HTTP {status}")));
                }
                Err(e) => {
                    let classified = Self::classify(e);
                    // Protocol errors are not transient; don't burn retries on them
                    if matches!(classified, BackendError::Protocol(_)) {
                        return Err(classified);
                    }
                    last_err = Some(classified);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| BackendError::Unavailable("no attempts made".into())))
    }
}

#[async_trait]
impl ToolServer for HttpToolServer {
    async fn list_tools(&self) -> BackendResult<Vec<ToolDefinition>> {
        let url = format!("{}/tools", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::classify)?;

        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!("HTTP {}", resp.status())));
        }

        resp.json::<Vec<ToolDefinition>>()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }

    async fn call_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> BackendResult<ToolCallOutcome> {
        let url = format!("{}/tools/{}", self.base_url, name);
        let start = Instant::now();

        let resp = self.post_with_retry(&url, &params).await?;

        let wire: WireCallResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(tool = name, latency_ms, success = wire.success, "tool call finished");

        Ok(ToolCallOutcome {
            success: wire.success,
            result: wire.result,
            error: wire.error,
            latency_ms,
        })
    }

    async fn health(&self) -> Health {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<WireHealth>().await {
                Ok(h) => match h.status.as_str() {
                    "ok" => Health::Ok,
                    "degraded" => Health::Degraded,
                    _ => Health::Down,
                },
                Err(_) => Health::Degraded,
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "tool server health returned non-success");
                Health::Down
            }
            Err(e) => {
                warn!(error = %e, "tool server unreachable");
                Health::Down
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let server = HttpToolServer::new("http://tools.local:3000/", 1000, 2).unwrap();
        assert_eq!(server.base_url(), "http://tools.local:3000");
    }

    #[tokio::test]
    async fn test_unreachable_server_maps_to_unavailable() {
        // Port 9 (discard) on localhost should refuse the connection quickly.
        let server = HttpToolServer::new("http://127.0.0.1:9", 500, 0).unwrap();
        let result = server.call_tool("echo", serde_json::json!({})).await;
        assert!(matches!(
            result,
            Err(BackendError::Unavailable(_)) | Err(BackendError::Timeout(_))
        ));

        assert_eq!(server.health().await, Health::Down);
    }
}
