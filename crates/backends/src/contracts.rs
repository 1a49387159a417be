//! Contracts for the external backends.
//!
//! The orchestration engine never talks to a concrete service directly; it
//! holds trait objects for the three collaborators defined here. Concrete
//! HTTP adapters live in sibling modules, and tests substitute stubs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Errors surfaced by backend adapters
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call timed out: {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unknown tool or resource: {0}")]
    NotFound(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Coarse health of a backend service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Ok,
    Degraded,
    Down,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// A tool advertised by the remote tool server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters, kept opaque
    pub parameters_schema: serde_json::Value,
}

/// Outcome of a single remote tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ToolCallOutcome {
    /// Extract a text payload from the result, if any.
    ///
    /// Tools return either a bare string or an object with a `text` field.
    pub fn text(&self) -> Option<String> {
        let value = self.result.as_ref()?;
        if let Some(s) = value.as_str() {
            return Some(s.to_string());
        }
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(String::from)
    }
}

/// Identity forwarded to backends for attribution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Answer produced by the local generative subsystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonerReply {
    pub answer: String,
    /// Opaque strategy label, recorded for observability only
    pub strategy: String,
    pub latency_ms: u64,
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

/// Rolling counters exposed by the local reasoner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonerStats {
    pub requests: u64,
    pub failures: u64,
    pub avg_latency_ms: u64,
}

/// Terminal status of a recorded episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Immutable record of one served request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query_text: String,
    pub answer_text: String,
    pub strategy_used: String,
    pub quality: f64,
    pub latency_ms: u64,
    pub status: EpisodeStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Episode {
    pub fn new(session_id: &str, query_text: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            user_id: None,
            query_text: query_text.to_string(),
            answer_text: String::new(),
            strategy_used: "unknown".to_string(),
            quality: 0.0,
            latency_ms: 0,
            status: EpisodeStatus::Completed,
            metadata: HashMap::new(),
        }
    }

    /// Whether this episode ended with a usable answer
    pub fn succeeded(&self) -> bool {
        self.status == EpisodeStatus::Completed && self.quality > 0.0
    }
}

/// Filters accepted by [`MemoryStore::search`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeFilters {
    pub user_id: Option<String>,
    pub strategy: Option<String>,
    pub min_quality: Option<f64>,
}

/// Result of a short-term to long-term consolidation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidateReport {
    pub promoted: usize,
    pub expired: usize,
}

/// Remote tool server: named tools invoked with JSON payloads.
#[async_trait]
pub trait ToolServer: Send + Sync {
    async fn list_tools(&self) -> BackendResult<Vec<ToolDefinition>>;

    async fn call_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> BackendResult<ToolCallOutcome>;

    async fn health(&self) -> Health;
}

/// Local generative subsystem with its own retrieval and agent loop.
#[async_trait]
pub trait LocalReasoner: Send + Sync {
    async fn process(&self, query: &str, caller: &CallerIdentity) -> BackendResult<ReasonerReply>;

    async fn stats(&self) -> ReasonerStats;
}

/// Hierarchical persistent episode memory.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, episode: Episode) -> BackendResult<()>;

    /// Most-recent-first episodes, optionally scoped to a session.
    async fn recent(&self, session_id: Option<&str>, n: usize) -> BackendResult<Vec<Episode>>;

    async fn search(&self, query_text: &str, filters: EpisodeFilters)
        -> BackendResult<Vec<Episode>>;

    /// Promote and expire short-term entries. Idempotent: a second call with
    /// no intervening writes reports zero promoted and zero expired.
    async fn consolidate(&self) -> BackendResult<ConsolidateReport>;
}
