//! The orchestrator engine.
//!
//! One request runs on one task. Fan-out (ensemble candidates, multimodal
//! media calls) is bounded and joined inside the request; every backend
//! call is a suspension point capped by the request deadline.

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use backends::{
    Capability, CallerIdentity, Episode, EpisodeStatus, Health, LocalReasoner, MemoryStore,
    ToolServer,
};

use crate::config::Config;
use crate::consensus::{ConsensusEngine, DecisionStatus, NewDecision, Role};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::events::{OrchestratorEvent, SharedEventBus};
use crate::metacognition::{
    classify, AnalysisContext, MetaCognition, MetaState, RouteDecision, TemporalSnapshot,
};
use crate::query::{AttachmentKind, Modality, Query};
use crate::registry::{BackendId, BackendRegistry};

use super::{
    ConsensusTrace, Diagnostics, OrchestratorResponse, RequestPhase, WorkflowKind,
};

/// Answer of last resort when every backend is down
const CANNED_APOLOGY: &str =
    "I'm sorry — none of my backends are reachable right now. Please try again shortly.";

/// Strategy label used for consensus refusals
const REJECTED_STRATEGY: &str = "rejected_by_consensus";

/// Tuning knobs, lifted from [`Config`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub complexity_threshold: f64,
    pub request_timeout_ms: u64,
    pub consensus_poll_ms: u64,
    pub recent_episode_window: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            quality_threshold: 0.7,
            max_iterations: 3,
            complexity_threshold: 0.5,
            request_timeout_ms: 60_000,
            consensus_poll_ms: 25,
            recent_episode_window: 10,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            max_iterations: config.max_iterations,
            complexity_threshold: config.complexity_threshold,
            request_timeout_ms: config.request_timeout_ms,
            consensus_poll_ms: 25,
            recent_episode_window: 10,
        }
    }
}

enum GateVerdict {
    Approved,
    Refused { reason: String },
}

/// Pick the workflow family for a query. Free function so the band logic is
/// testable without backends.
pub(crate) fn choose_workflow(
    query: &Query,
    state: &MetaState,
    route: &RouteDecision,
    reasoner_available: bool,
    complexity_threshold: f64,
) -> WorkflowKind {
    if route.use_ensemble && reasoner_available {
        return WorkflowKind::Ensemble;
    }
    if state.modality != Modality::Text {
        return WorkflowKind::Multimodal;
    }
    if (state.complexity >= 0.7 || classify::has_task_keywords(&query.text)) && reasoner_available
    {
        return WorkflowKind::Local;
    }
    if state.complexity < complexity_threshold {
        WorkflowKind::Simple
    } else {
        WorkflowKind::Complex
    }
}

pub struct Orchestrator {
    tools: Arc<dyn ToolServer>,
    reasoner: Option<Arc<dyn LocalReasoner>>,
    memory: Arc<dyn MemoryStore>,
    meta: Arc<dyn MetaCognition>,
    consensus: Arc<ConsensusEngine>,
    registry: Arc<BackendRegistry>,
    events: SharedEventBus,
    settings: OrchestratorSettings,
    started_at: Instant,
    last_activity: RwLock<Instant>,
    interactions: AtomicU32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tools: Arc<dyn ToolServer>,
        reasoner: Option<Arc<dyn LocalReasoner>>,
        memory: Arc<dyn MemoryStore>,
        meta: Arc<dyn MetaCognition>,
        consensus: Arc<ConsensusEngine>,
        registry: Arc<BackendRegistry>,
        events: SharedEventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            tools,
            reasoner,
            memory,
            meta,
            consensus,
            registry,
            events,
            settings,
            started_at: Instant::now(),
            last_activity: RwLock::new(Instant::now()),
            interactions: AtomicU32::new(0),
        }
    }

    pub fn consensus_engine(&self) -> &Arc<ConsensusEngine> {
        &self.consensus
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn memory_store(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    /// Live health of the external backends, refreshing the registry.
    pub async fn backend_health(&self) -> (Health, Option<backends::ReasonerStats>) {
        let tool_health = self.tools.health().await;
        self.registry.set_status(BackendId::ToolServer, tool_health);

        let reasoner_stats = match self.reasoner {
            Some(ref reasoner) => Some(reasoner.stats().await),
            None => None,
        };
        (tool_health, reasoner_stats)
    }

    fn temporal_snapshot(&self) -> TemporalSnapshot {
        let last = *self.last_activity.read().unwrap_or_else(|p| p.into_inner());
        TemporalSnapshot {
            session_age_s: self.started_at.elapsed().as_secs(),
            context_freshness: TemporalSnapshot::freshness_for(last.elapsed().as_secs()),
            interactions: self.interactions.load(Ordering::Relaxed),
        }
    }

    fn touch(&self) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_activity.write().unwrap_or_else(|p| p.into_inner());
        *last = Instant::now();
    }

    /// Serve one query end to end.
    pub async fn process(&self, query: &Query) -> CoreResult<OrchestratorResponse> {
        let start = Instant::now();
        let deadline = start + Duration::from_millis(self.settings.request_timeout_ms);
        query.validate()?;

        let mut diag = Diagnostics::default();
        let temporal = self.temporal_snapshot();
        self.touch();

        let episodes = match self
            .memory
            .recent(query.session_id.as_deref(), self.settings.recent_episode_window)
            .await
        {
            Ok(episodes) => episodes,
            Err(e) => {
                diag.warn(format!("memory lookup failed: {e}"));
                Vec::new()
            }
        };

        let summaries = self.registry.summaries();
        let context = AnalysisContext {
            episodes,
            backends: summaries.clone(),
            temporal,
        };

        diag.enter(RequestPhase::Classified);
        let state = match self.meta.analyze(query, &context) {
            Ok(state) => state,
            Err(e) if e.kind == ErrorKind::InvalidInput => return Err(e),
            Err(e) => {
                diag.warn(format!("analysis failed, degraded state: {}", e.message));
                MetaState::degraded(&e.message)
            }
        };
        diag.enter(RequestPhase::Analyzed);

        let route = self.meta.route(&state, &summaries, &query.options);
        diag.routing_rationale = route.rationale.clone();

        // Consensus is a gate, not a per-iteration check.
        let gate_needed = query.options.consensus_required
            || (state.criticality >= 0.75 && self.consensus.has_role(Role::PrimaryUser));
        if gate_needed {
            diag.enter(RequestPhase::ConsensusPending);
            match self.consensus_gate(query, &state, &route, deadline, &mut diag).await? {
                GateVerdict::Approved => diag.enter(RequestPhase::ConsensusApproved),
                GateVerdict::Refused { reason } => {
                    diag.enter(RequestPhase::ConsensusRejected);
                    return Ok(self.refusal_response(query, &state, reason, start, diag).await);
                }
            }
        }

        let workflow = choose_workflow(
            query,
            &state,
            &route,
            self.reasoner.is_some(),
            self.settings.complexity_threshold,
        );
        info!(
            query_id = %query.id,
            workflow = %workflow,
            complexity = state.complexity,
            composite = state.composite,
            "workflow selected"
        );

        let quality_threshold = query
            .options
            .quality_threshold
            .unwrap_or(self.settings.quality_threshold);
        let max_iterations = query
            .options
            .max_iterations
            .unwrap_or(self.settings.max_iterations);

        let mut iterations = 0u32;
        let mut best_answer = String::new();
        let mut best_quality = f64::NEG_INFINITY;
        let mut critique: Option<Vec<String>> = None;
        let mut previous_answer: Option<String> = None;
        let mut consecutive_drops = 0u32;
        let mut canned = false;

        loop {
            iterations += 1;
            diag.enter(if iterations == 1 {
                RequestPhase::Dispatched
            } else {
                RequestPhase::Refining
            });

            let dispatched = self
                .dispatch(
                    workflow,
                    query,
                    critique.as_deref(),
                    previous_answer.as_deref(),
                    quality_threshold,
                    deadline,
                    &mut diag,
                )
                .await;

            let answer = match dispatched {
                Ok(answer) => answer,
                Err(e) if e.is_recoverable() => {
                    diag.warn(format!("{workflow} dispatch failed: {}", e.message));
                    let (answer, was_canned) = self.fallback(query, deadline, &mut diag).await;
                    canned = was_canned;
                    answer
                }
                Err(e) => {
                    diag.enter(RequestPhase::Error);
                    self.persist_episode(
                        query,
                        &state,
                        workflow.label(),
                        "",
                        0.0,
                        iterations,
                        start,
                        EpisodeStatus::Failed,
                        &mut diag,
                    )
                    .await;
                    return Err(e);
                }
            };

            if canned {
                best_answer = answer;
                best_quality = 0.0;
                diag.quality_history.push(0.0);
                break;
            }

            diag.enter(RequestPhase::Evaluated);
            let report = self.meta.evaluate(&query.text, &answer);
            diag.quality_history.push(report.score);

            if report.score > best_quality {
                best_quality = report.score;
                best_answer = answer.clone();
            }

            let history = &diag.quality_history;
            if history.len() >= 2 && history[history.len() - 1] < history[history.len() - 2] {
                consecutive_drops += 1;
            } else {
                consecutive_drops = 0;
            }
            if consecutive_drops >= 3 {
                diag.warn("refinement diverging for three iterations, keeping best answer");
                break;
            }

            if report.score >= quality_threshold || iterations >= max_iterations {
                break;
            }
            if Instant::now() >= deadline {
                diag.warn("request deadline reached during refinement");
                break;
            }

            critique = Some(report.issues);
            previous_answer = Some(answer);
        }

        let quality = best_quality.max(0.0);
        diag.enter(RequestPhase::Persisted);
        self.persist_episode(
            query,
            &state,
            workflow.label(),
            &best_answer,
            quality,
            iterations,
            start,
            EpisodeStatus::Completed,
            &mut diag,
        )
        .await;
        diag.enter(RequestPhase::Done);

        Ok(OrchestratorResponse {
            answer: best_answer,
            quality,
            strategy_used: workflow.label().to_string(),
            iterations,
            latency_ms: start.elapsed().as_millis() as u64,
            diagnostics: diag,
        })
    }

    async fn refusal_response(
        &self,
        query: &Query,
        state: &MetaState,
        reason: String,
        start: Instant,
        mut diag: Diagnostics,
    ) -> OrchestratorResponse {
        self.events.publish(OrchestratorEvent::RequestRejected {
            session_id: query.session_key().to_string(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });

        self.persist_episode(
            query,
            state,
            REJECTED_STRATEGY,
            "",
            0.0,
            1,
            start,
            EpisodeStatus::Completed,
            &mut diag,
        )
        .await;

        OrchestratorResponse {
            answer: format!("This request was not approved for execution ({reason})."),
            quality: 0.0,
            strategy_used: REJECTED_STRATEGY.to_string(),
            iterations: 1,
            latency_ms: start.elapsed().as_millis() as u64,
            diagnostics: diag,
        }
    }

    async fn consensus_gate(
        &self,
        query: &Query,
        state: &MetaState,
        route: &RouteDecision,
        request_deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<GateVerdict> {
        let preview: String = query.text.chars().take(60).collect();
        let deadline =
            Utc::now() + chrono::Duration::milliseconds(self.consensus.default_deadline_ms() as i64);

        let decision_id = self.consensus.open_decision(NewDecision {
            title: format!("execute query: {preview}"),
            description: query.text.clone(),
            decision_type: "query_execution".to_string(),
            criticality: state.criticality,
            recommended_option: Some(route.primary.to_string()),
            required_roles: Vec::new(),
            rule: self.consensus.default_rule(),
            deadline,
            require_verified: state.criticality >= 0.8,
        })?;

        // The option risk handed to agent auto-vote is the analyzed
        // criticality of acting on the recommendation.
        let _ = self.consensus.auto_vote_agents(&decision_id, state.criticality);

        let poll = Duration::from_millis(self.settings.consensus_poll_ms.max(5));
        let outcome = loop {
            let outcome = self.consensus.tally(&decision_id)?;
            if outcome.decided {
                break outcome;
            }
            if Instant::now() >= request_deadline {
                break crate::consensus::TallyOutcome {
                    decided: true,
                    status: DecisionStatus::Expired,
                    rationale: "timeout".to_string(),
                };
            }
            tokio::time::sleep(poll).await;
        };

        diag.consensus = Some(ConsensusTrace {
            decision_id,
            status: outcome.status,
            rationale: outcome.rationale.clone(),
        });

        match outcome.status {
            DecisionStatus::Approved => Ok(GateVerdict::Approved),
            DecisionStatus::Expired => Ok(GateVerdict::Refused {
                reason: "timeout".to_string(),
            }),
            _ => Ok(GateVerdict::Refused {
                reason: outcome.rationale,
            }),
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        workflow: WorkflowKind,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        quality_threshold: f64,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        match workflow {
            WorkflowKind::Simple => {
                self.simple_workflow(query, critique, previous_answer, deadline, diag)
                    .await
            }
            WorkflowKind::Complex => {
                self.complex_workflow(query, critique, previous_answer, deadline, diag)
                    .await
            }
            WorkflowKind::Multimodal => {
                self.multimodal_workflow(query, critique, previous_answer, deadline, diag)
                    .await
            }
            WorkflowKind::Local => {
                self.local_workflow(query, critique, previous_answer, deadline, diag)
                    .await
            }
            WorkflowKind::Ensemble => {
                self.ensemble_workflow(
                    query,
                    critique,
                    previous_answer,
                    quality_threshold,
                    deadline,
                    diag,
                )
                .await
            }
        }
    }

    fn augmented_text(
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
    ) -> String {
        match (critique, previous_answer) {
            (Some(issues), Some(previous)) if !issues.is_empty() => format!(
                "{}\n\nRefine the previous answer.\nPrevious answer:\n{}\nIssues to address:\n- {}",
                query.text,
                previous,
                issues.join("\n- ")
            ),
            (_, Some(previous)) => format!(
                "{}\n\nRefine the previous answer.\nPrevious answer:\n{}",
                query.text, previous
            ),
            _ => query.text.clone(),
        }
    }

    fn remaining(deadline: Instant) -> CoreResult<Duration> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(CoreError::timeout("request deadline reached"))
        } else {
            Ok(remaining)
        }
    }

    /// Invoke a capability on the tool server with deadline and health
    /// bookkeeping. Unsuccessful outcomes surface as `BACKEND_UNAVAILABLE`.
    async fn call_capability(
        &self,
        capability: &Capability,
        params: serde_json::Value,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<backends::ToolCallOutcome> {
        let tool_name = self
            .registry
            .capability_map()
            .resolve(capability)
            .map_err(CoreError::from)?
            .to_string();

        let remaining = Self::remaining(deadline)?;
        match tokio::time::timeout(remaining, self.tools.call_tool(&tool_name, params)).await {
            Err(_) => {
                self.registry.record_failure(BackendId::ToolServer);
                Err(CoreError::timeout(format!("tool {tool_name} timed out")))
            }
            Ok(Err(e)) => {
                self.registry.record_failure(BackendId::ToolServer);
                Err(e.into())
            }
            Ok(Ok(outcome)) => {
                diag.record_call(&tool_name, outcome.latency_ms, outcome.success);
                if outcome.success {
                    self.registry
                        .record_success(BackendId::ToolServer, outcome.latency_ms);
                    Ok(outcome)
                } else {
                    self.registry.record_failure(BackendId::ToolServer);
                    Err(CoreError::backend_unavailable(
                        outcome
                            .error
                            .unwrap_or_else(|| format!("tool {tool_name} reported failure")),
                    ))
                }
            }
        }
    }

    async fn simple_workflow(
        &self,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        let params = serde_json::json!({
            "query": Self::augmented_text(query, critique, previous_answer),
            "session_id": query.session_id,
        });
        let outcome = self
            .call_capability(&Capability::ConversationalResponder, params, deadline, diag)
            .await?;
        outcome
            .text()
            .ok_or_else(|| CoreError::internal("conversational tool returned no text"))
    }

    async fn complex_workflow(
        &self,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        let retrieval = self
            .call_capability(
                &Capability::Retriever,
                serde_json::json!({"query": query.text, "k": 5}),
                deadline,
                diag,
            )
            .await;

        let context = match retrieval {
            Ok(outcome) => outcome.result,
            Err(e) => {
                diag.warn(format!("retrieval failed, synthesizing without context: {e}"));
                None
            }
        };

        let params = serde_json::json!({
            "query": Self::augmented_text(query, critique, previous_answer),
            "context": context,
        });
        let synthesis = self
            .call_capability(&Capability::Synthesize, params, deadline, diag)
            .await;

        match synthesis {
            Ok(outcome) => outcome
                .text()
                .ok_or_else(|| CoreError::internal("synthesize tool returned no text")),
            Err(e) if e.is_recoverable() => {
                diag.warn(format!("synthesis failed, degrading to simple workflow: {}", e.message));
                self.simple_workflow(query, critique, previous_answer, deadline, diag)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn multimodal_workflow(
        &self,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        let mut calls = Vec::new();
        for attachment in &query.attachments {
            let (capability, params) = match attachment.kind {
                AttachmentKind::Image => (
                    Capability::ImageAnalyzer,
                    serde_json::json!({"image_url": attachment.url}),
                ),
                AttachmentKind::Audio => (
                    Capability::AudioTranscriber,
                    serde_json::json!({"audio_url": attachment.url}),
                ),
            };
            let tool_name = self
                .registry
                .capability_map()
                .resolve(&capability)
                .map_err(CoreError::from)?
                .to_string();
            calls.push((tool_name, params));
        }

        // Analyze media concurrently, then synthesize over the findings.
        let remaining = Self::remaining(deadline)?;
        let futures: Vec<_> = calls
            .iter()
            .map(|(name, params)| self.tools.call_tool(name, params.clone()))
            .collect();
        let results = match tokio::time::timeout(remaining, futures::future::join_all(futures)).await
        {
            Ok(results) => results,
            Err(_) => {
                self.registry.record_failure(BackendId::ToolServer);
                return Err(CoreError::timeout("media analysis timed out"));
            }
        };

        let mut findings = Vec::new();
        for ((name, _), result) in calls.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    diag.record_call(name, outcome.latency_ms, outcome.success);
                    if outcome.success {
                        self.registry
                            .record_success(BackendId::ToolServer, outcome.latency_ms);
                        if let Some(text) = outcome.text() {
                            findings.push(format!("{name}: {text}"));
                        }
                    } else {
                        self.registry.record_failure(BackendId::ToolServer);
                        diag.warn(format!(
                            "media tool {name} failed: {}",
                            outcome.error.unwrap_or_default()
                        ));
                    }
                }
                Err(e) => {
                    self.registry.record_failure(BackendId::ToolServer);
                    diag.warn(format!("media tool {name} unreachable: {e}"));
                }
            }
        }

        if findings.is_empty() {
            return Err(CoreError::backend_unavailable(
                "no media analysis result available",
            ));
        }

        let enriched = format!(
            "{}\n\nMedia findings:\n{}",
            Self::augmented_text(query, critique, previous_answer),
            findings.join("\n")
        );
        let outcome = self
            .call_capability(
                &Capability::Synthesize,
                serde_json::json!({"query": enriched}),
                deadline,
                diag,
            )
            .await?;
        outcome
            .text()
            .ok_or_else(|| CoreError::internal("synthesize tool returned no text"))
    }

    async fn local_workflow(
        &self,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        let reasoner = self
            .reasoner
            .as_ref()
            .ok_or_else(|| CoreError::backend_unavailable("local reasoner is not enabled"))?;

        let caller = CallerIdentity {
            user_id: query.user_id.clone(),
            session_id: query.session_id.clone(),
        };
        let text = Self::augmented_text(query, critique, previous_answer);

        let remaining = Self::remaining(deadline)?;
        match tokio::time::timeout(remaining, reasoner.process(&text, &caller)).await {
            Err(_) => {
                self.registry.record_failure(BackendId::LocalReasoner);
                Err(CoreError::timeout("local reasoner timed out"))
            }
            Ok(Err(e)) => {
                self.registry.record_failure(BackendId::LocalReasoner);
                Err(e.into())
            }
            Ok(Ok(reply)) => {
                diag.record_call("local_reasoner", reply.latency_ms, true);
                self.registry
                    .record_success(BackendId::LocalReasoner, reply.latency_ms);
                Ok(reply.answer)
            }
        }
    }

    /// Run the local and complex paths concurrently and combine: a clear
    /// score gap picks the winner, a near-tie is merged through the
    /// synthesize tool and re-evaluated.
    #[allow(clippy::too_many_arguments)]
    async fn ensemble_workflow(
        &self,
        query: &Query,
        critique: Option<&[String]>,
        previous_answer: Option<&str>,
        quality_threshold: f64,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> CoreResult<String> {
        let mut local_diag = Diagnostics::default();
        let mut complex_diag = Diagnostics::default();

        let (local_result, complex_result) = tokio::join!(
            self.local_workflow(query, critique, previous_answer, deadline, &mut local_diag),
            self.complex_workflow(query, critique, previous_answer, deadline, &mut complex_diag),
        );

        diag.tool_calls.extend(local_diag.tool_calls);
        diag.tool_calls.extend(complex_diag.tool_calls);
        diag.warnings.extend(local_diag.warnings);
        diag.warnings.extend(complex_diag.warnings);

        match (local_result, complex_result) {
            (Ok(local), Ok(complex)) => {
                let q_local = self.meta.evaluate(&query.text, &local).score;
                let q_complex = self.meta.evaluate(&query.text, &complex).score;

                if (q_local - q_complex).abs() >= 0.1 {
                    let (winner, score) = if q_local > q_complex {
                        (local, q_local)
                    } else {
                        (complex, q_complex)
                    };
                    diag.warn(format!("ensemble winner by score gap ({score:.2})"));
                    return Ok(winner);
                }

                let merged = self
                    .call_capability(
                        &Capability::Synthesize,
                        serde_json::json!({
                            "query": query.text,
                            "candidates": [local, complex],
                        }),
                        deadline,
                        diag,
                    )
                    .await
                    .ok()
                    .and_then(|outcome| outcome.text());

                if let Some(merged) = merged {
                    let q_merged = self.meta.evaluate(&query.text, &merged).score;
                    if q_merged >= quality_threshold {
                        return Ok(merged);
                    }
                }

                diag.warn("ensemble merge below threshold, keeping best candidate");
                Ok(if q_local >= q_complex { local } else { complex })
            }
            (Ok(local), Err(e)) => {
                diag.warn(format!("ensemble complex candidate failed: {e}"));
                Ok(local)
            }
            (Err(e), Ok(complex)) => {
                diag.warn(format!("ensemble local candidate failed: {e}"));
                Ok(complex)
            }
            (Err(local_err), Err(_)) => Err(local_err),
        }
    }

    /// Fixed fallback order: tool server, then local reasoner, then the
    /// canned apology with quality zero.
    async fn fallback(
        &self,
        query: &Query,
        deadline: Instant,
        diag: &mut Diagnostics,
    ) -> (String, bool) {
        match self.simple_workflow(query, None, None, deadline, diag).await {
            Ok(answer) => return (answer, false),
            Err(e) => diag.warn(format!("fallback tool server failed: {e}")),
        }

        if self.reasoner.is_some() {
            match self.local_workflow(query, None, None, deadline, diag).await {
                Ok(answer) => return (answer, false),
                Err(e) => diag.warn(format!("fallback local reasoner failed: {e}")),
            }
        }

        (CANNED_APOLOGY.to_string(), true)
    }

    // ── Persistence ──────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    async fn persist_episode(
        &self,
        query: &Query,
        state: &MetaState,
        strategy_used: &str,
        answer: &str,
        quality: f64,
        iterations: u32,
        start: Instant,
        status: EpisodeStatus,
        diag: &mut Diagnostics,
    ) {
        let mut episode = Episode::new(query.session_key(), &query.text);
        episode.user_id = query.user_id.clone();
        episode.answer_text = answer.to_string();
        episode.strategy_used = strategy_used.to_string();
        episode.quality = quality;
        episode.latency_ms = start.elapsed().as_millis() as u64;
        episode.status = status;
        episode
            .metadata
            .insert("strategy".into(), state.resolved_strategy.name().to_string());
        episode
            .metadata
            .insert("iterations".into(), iterations.to_string());
        episode
            .metadata
            .insert("modality".into(), state.modality.to_string());

        let episode_id = episode.id.clone();
        let session_id = episode.session_id.clone();

        // Best effort: a memory outage never fails the request.
        if let Err(e) = self.memory.append(episode).await {
            warn!(error = %e, "episode append failed");
            diag.warn(format!("episode not persisted: {e}"));
            return;
        }

        self.events.publish(OrchestratorEvent::EpisodeRecorded {
            session_id,
            episode_id,
            strategy: strategy_used.to_string(),
            quality,
            timestamp: Utc::now(),
        });
    }
}
