//! HTTP handlers and wire types.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use async_trait::async_trait;

use crate::consensus::{ConsensusRule, Role, VoteChoice};
use crate::error::{CoreError, ErrorKind};
use crate::orchestrator::{Orchestrator, OrchestratorResponse};
use crate::planning::{
    ExecutionSummary, Goal, GoalPriority, NewGoal, Plan, PlanStrategy, Step, StepExecutor,
};
use crate::query::{Attachment, Query, QueryOptions};

use super::AppState;

// ── Error envelope ───────────────────────────────────────────────────────

/// Stable user-facing error shape
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

pub struct ApiError {
    status: StatusCode,
    envelope: ErrorEnvelope,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            envelope: ErrorEnvelope {
                code,
                message: message.into(),
                retry_after: None,
            },
        }
    }

    pub fn rate_limited() -> Self {
        let mut err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "BACKEND_UNAVAILABLE",
            "rate limit exceeded",
        );
        err.envelope.retry_after = Some(30);
        err
    }

    pub fn overloaded() -> Self {
        let mut err = Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "BACKEND_UNAVAILABLE",
            "request queue is full",
        );
        err.envelope.retry_after = Some(5);
        err
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::FORBIDDEN, "UNAUTHORIZED", "operator token required")
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        // Client-caused kinds keep their message; upstream and internal
        // failures get a generic one, with the detail in the log only.
        let (status, message) = match err.kind {
            ErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, err.message.clone()),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, err.message.clone()),
            ErrorKind::Precondition => (StatusCode::CONFLICT, err.message.clone()),
            ErrorKind::Unauthorized => (StatusCode::FORBIDDEN, err.message.clone()),
            ErrorKind::BackendUnavailable => {
                error!(detail = %err.message, "upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "upstream backend unavailable".to_string(),
                )
            }
            ErrorKind::Timeout => {
                error!(detail = %err.message, "request timed out");
                (StatusCode::GATEWAY_TIMEOUT, "request timed out".to_string())
            }
            ErrorKind::Internal => {
                error!(detail = %err.message, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let mut api = Self::new(status, err.kind.code(), message);
        api.envelope.retry_after = err.retry_after_ms.map(|ms| ms.div_ceil(1000)).or(
            if err.kind == ErrorKind::BackendUnavailable {
                Some(10)
            } else {
                None
            },
        );
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}

// ── /v1/query ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub options: Option<QueryOptions>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Caller-visible slice of the request diagnostics
#[derive(Debug, Serialize)]
pub struct PublicDiagnostics {
    pub quality_history: Vec<f64>,
    pub phases: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub quality: f64,
    pub strategy_used: String,
    pub iterations: u32,
    pub latency_ms: u64,
    pub diagnostics: PublicDiagnostics,
}

impl From<OrchestratorResponse> for QueryResponse {
    fn from(response: OrchestratorResponse) -> Self {
        Self {
            answer: response.answer,
            quality: response.quality,
            strategy_used: response.strategy_used,
            iterations: response.iterations,
            latency_ms: response.latency_ms,
            diagnostics: PublicDiagnostics {
                quality_history: response.diagnostics.quality_history,
                phases: response.diagnostics.phases,
            },
        }
    }
}

pub async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let caller = body
        .user_id
        .clone()
        .or_else(|| {
            headers
                .get("x-caller-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| "anonymous".to_string());

    if !state.limiter.allow(&caller) {
        return Err(ApiError::rate_limited());
    }
    let Ok(_permit) = state.permits.clone().try_acquire_owned() else {
        return Err(ApiError::overloaded());
    };

    let mut query = Query::new(&body.query);
    query.user_id = body.user_id;
    query.session_id = body.session_id;
    query.attachments = body.attachments;
    if let Some(options) = body.options {
        query.options = options;
    }

    let response = state.orchestrator.process(&query).await?;
    Ok(Json(QueryResponse::from(response)))
}

// ── /v1/status and /v1/capabilities ──────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub uptime_s: u64,
    pub queue_depth: usize,
    pub tool_server: String,
    pub local_reasoner: Option<backends::ReasonerStats>,
    pub consensus: crate::consensus::ConsensusStats,
    pub planning: crate::planning::PlannerSnapshot,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (tool_health, reasoner_stats) = state.orchestrator.backend_health().await;

    Json(StatusResponse {
        status: "ok",
        uptime_s: state.uptime_s(),
        queue_depth: state.queue_depth(),
        tool_server: tool_health.to_string(),
        local_reasoner: reasoner_stats,
        consensus: state.consensus.stats(),
        planning: state.planner.snapshot(),
    })
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub capabilities: std::collections::BTreeMap<String, String>,
}

pub async fn capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: state
            .orchestrator
            .registry()
            .capability_map()
            .as_table()
            .clone(),
    })
}

// ── /v1/planning ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateGoalRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: GoalPriority,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependency_ids: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

pub async fn create_goal(
    State(state): State<AppState>,
    Json(body): Json<CreateGoalRequest>,
) -> Result<Json<Goal>, ApiError> {
    let goal = state.planner.create_goal(NewGoal {
        title: body.title,
        description: body.description,
        priority: body.priority,
        parent_id: body.parent_id,
        dependency_ids: body.dependency_ids,
        success_criteria: body.success_criteria,
    })?;
    Ok(Json(goal))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Goal>, ApiError> {
    state
        .planner
        .goal(&id)
        .map(Json)
        .ok_or_else(|| CoreError::not_found(format!("goal {id}")).into())
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub goal_id: String,
    pub strategy: PlanStrategy,
}

pub async fn create_plan(
    State(state): State<AppState>,
    Json(body): Json<CreatePlanRequest>,
) -> Result<Json<Plan>, ApiError> {
    let plan = state.planner.create_plan(&body.goal_id, body.strategy)?;
    Ok(Json(plan))
}

/// Steps are executed against the orchestrator itself: each step becomes a
/// query whose answer is the step result.
struct QueryStepExecutor {
    orchestrator: Arc<Orchestrator>,
}

#[async_trait]
impl StepExecutor for QueryStepExecutor {
    async fn execute(&self, step: &Step) -> Result<serde_json::Value, String> {
        let query = Query::new(&step.description);
        match self.orchestrator.process(&query).await {
            Ok(response) if response.quality > 0.0 => Ok(serde_json::json!({
                "answer": response.answer,
                "quality": response.quality,
                "strategy": response.strategy_used,
            })),
            Ok(response) => Err(format!(
                "step produced no usable answer (strategy {})",
                response.strategy_used
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub async fn execute_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSummary>, ApiError> {
    let executor = Arc::new(QueryStepExecutor {
        orchestrator: state.orchestrator.clone(),
    });
    let summary = state.planner.execute_plan(&id, executor).await?;
    Ok(Json(summary))
}

// ── /v1/sci ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterParticipantRequest {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Serialize)]
pub struct RegisterParticipantResponse {
    pub participant_id: String,
}

pub async fn register_participant(
    State(state): State<AppState>,
    Json(body): Json<RegisterParticipantRequest>,
) -> Result<Json<RegisterParticipantResponse>, ApiError> {
    let participant_id = state
        .consensus
        .register_participant(&body.name, body.role, body.verified)?;
    Ok(Json(RegisterParticipantResponse { participant_id }))
}

#[derive(Debug, Deserialize)]
pub struct OpenDecisionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_decision_type")]
    pub decision_type: String,
    pub criticality: f64,
    pub recommended_option: Option<String>,
    #[serde(default)]
    pub required_roles: Vec<Role>,
    pub consensus_type: Option<ConsensusRule>,
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub require_verified: bool,
}

fn default_decision_type() -> String {
    "general".to_string()
}

#[derive(Debug, Serialize)]
pub struct OpenDecisionResponse {
    pub decision_id: String,
}

pub async fn open_decision(
    State(state): State<AppState>,
    Json(body): Json<OpenDecisionRequest>,
) -> Result<Json<OpenDecisionResponse>, ApiError> {
    let deadline_ms = body.deadline_ms.unwrap_or(state.consensus.default_deadline_ms());
    let decision_id = state.consensus.open_decision(crate::consensus::NewDecision {
        title: body.title,
        description: body.description,
        decision_type: body.decision_type,
        criticality: body.criticality,
        recommended_option: body.recommended_option,
        required_roles: body.required_roles,
        rule: body.consensus_type.unwrap_or(state.consensus.default_rule()),
        deadline: Utc::now() + chrono::Duration::milliseconds(deadline_ms as i64),
        require_verified: body.require_verified,
    })?;
    Ok(Json(OpenDecisionResponse { decision_id }))
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub decision_id: String,
    pub participant_id: String,
    pub choice: VoteChoice,
    pub rationale: Option<String>,
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Json(body): Json<CastVoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.consensus.cast_vote(
        &body.decision_id,
        &body.participant_id,
        body.choice,
        body.rationale,
    )?;
    Ok(Json(serde_json::json!({"ok": true})))
}

pub async fn tally_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::consensus::TallyOutcome>, ApiError> {
    let outcome = state.consensus.tally(&id)?;
    Ok(Json(outcome))
}

// ── Operator path ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OperatorDiagnostics {
    pub queue_depth: usize,
    pub consensus: crate::consensus::ConsensusStats,
    pub planning: crate::planning::PlannerSnapshot,
    pub flags: Vec<crate::rollout::FeatureFlag>,
    pub backends: Vec<crate::registry::BackendEntry>,
}

pub async fn operator_diagnostics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OperatorDiagnostics>, ApiError> {
    let token = headers
        .get("x-operator-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if state.operator_token.is_empty() || token != state.operator_token.as_str() {
        return Err(ApiError::unauthorized());
    }

    let registry = state.orchestrator.registry();
    let backends = registry
        .summaries()
        .iter()
        .filter_map(|s| registry.entry(s.id))
        .collect();

    Ok(Json(OperatorDiagnostics {
        queue_depth: state.queue_depth(),
        consensus: state.consensus.stats(),
        planning: state.planner.snapshot(),
        flags: state.flags.list(),
        backends,
    }))
}
