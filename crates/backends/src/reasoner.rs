//! HTTP client for the local generative subsystem.
//!
//! The reasoner runs as a separate process with its own retrieval and agent
//! loop; this adapter only forwards queries and keeps rolling counters.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::contracts::{
    BackendError, BackendResult, CallerIdentity, LocalReasoner, ReasonerReply, ReasonerStats,
};

/// Local reasoner reached over HTTP/JSON
pub struct HttpReasoner {
    base_url: String,
    client: reqwest::Client,
    counters: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
    requests: u64,
    failures: u64,
    total_latency_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    answer: String,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    latency_ms: Option<u64>,
    #[serde(default)]
    diagnostics: Vec<String>,
}

impl HttpReasoner {
    pub fn new(base_url: &str, timeout_ms: u64) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            counters: Mutex::new(Counters::default()),
        })
    }

    fn record(&self, latency_ms: u64, failed: bool) {
        let mut c = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        c.requests += 1;
        c.total_latency_ms += latency_ms;
        if failed {
            c.failures += 1;
        }
    }
}

#[async_trait]
impl LocalReasoner for HttpReasoner {
    async fn process(&self, query: &str, caller: &CallerIdentity) -> BackendResult<ReasonerReply> {
        let url = format!("{}/process", self.base_url);
        let body = serde_json::json!({
            "query": query,
            "user_id": caller.user_id,
            "session_id": caller.session_id,
        });

        let start = Instant::now();
        let resp = self.client.post(&url).json(&body).send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let resp = match resp {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                self.record(elapsed_ms, true);
                return Err(BackendError::Unavailable(format!("HTTP {}", r.status())));
            }
            Err(e) => {
                self.record(elapsed_ms, true);
                return Err(if e.is_timeout() {
                    BackendError::Timeout(e.to_string())
                } else {
                    BackendError::Unavailable(e.to_string())
                });
            }
        };

        let wire: WireReply = resp.json().await.map_err(|e| {
            self.record(elapsed_ms, true);
            BackendError::Protocol(e.to_string())
        })?;

        self.record(elapsed_ms, false);
        debug!(latency_ms = elapsed_ms, "local reasoner replied");

        Ok(ReasonerReply {
            answer: wire.answer,
            strategy: wire.strategy.unwrap_or_else(|| "local".to_string()),
            latency_ms: wire.latency_ms.unwrap_or(elapsed_ms),
            diagnostics: wire.diagnostics,
        })
    }

    async fn stats(&self) -> ReasonerStats {
        let c = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        ReasonerStats {
            requests: c.requests,
            failures: c.failures,
            avg_latency_ms: if c.requests == 0 {
                0
            } else {
                c.total_latency_ms / c.requests
            },
        }
    }
}
