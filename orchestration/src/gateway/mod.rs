//! JSON/HTTP gateway: ingress validation, rate limiting, backpressure, and
//! response shaping.
//!
//! The wire types in [`routes`] are transport-agnostic serde records; an RPC
//! surface reuses them unchanged. Kinds map to a stable envelope
//! `{code, message, retry_after?}` and internal diagnostics stay behind the
//! operator path.

pub mod limit;
pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::consensus::ConsensusEngine;
use crate::orchestrator::Orchestrator;
use crate::planning::StrategicPlanner;
use crate::rollout::FlagStore;

pub use limit::RateLimiter;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub planner: Arc<StrategicPlanner>,
    pub consensus: Arc<ConsensusEngine>,
    pub flags: Arc<FlagStore>,
    pub limiter: Arc<RateLimiter>,
    /// Request-queue permits; exhaustion rejects with retry-after
    pub permits: Arc<Semaphore>,
    /// Semaphore capacity, kept alongside since it exposes no getter
    pub max_concurrent: usize,
    pub operator_token: Arc<String>,
    pub started_at: Instant,
}

impl AppState {
    /// Requests currently holding a permit.
    pub fn queue_depth(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.permits.available_permits())
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Build the HTTP router over the shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/query", post(routes::query))
        .route("/v1/status", get(routes::status))
        .route("/v1/capabilities", get(routes::capabilities))
        .route("/v1/planning/goals", post(routes::create_goal))
        .route("/v1/planning/goals/:id", get(routes::get_goal))
        .route("/v1/planning/plans", post(routes::create_plan))
        .route("/v1/planning/plans/:id/execute", post(routes::execute_plan))
        .route("/v1/sci/participants", post(routes::register_participant))
        .route("/v1/sci/decisions", post(routes::open_decision))
        .route("/v1/sci/votes", post(routes::cast_vote))
        .route("/v1/sci/decisions/:id/tally", post(routes::tally_decision))
        .route("/v1/internal/diagnostics", get(routes::operator_diagnostics))
        .with_state(state)
}
