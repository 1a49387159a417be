//! Shared test doubles: scriptable tool server and local reasoner, plus a
//! harness that wires a full orchestrator over them.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use backends::{
    BackendError, BackendResult, CallerIdentity, CapabilityMap, Health, LocalReasoner,
    MemoryStore, ReasonerReply, ReasonerStats, TieredMemoryStore, ToolCallOutcome,
    ToolDefinition, ToolServer,
};
use orchestration::config::ConsensusDefaults;
use orchestration::consensus::ConsensusEngine;
use orchestration::metacognition::{DecisionStrategy, Introspector};
use orchestration::orchestrator::{Orchestrator, OrchestratorSettings};
use orchestration::registry::BackendRegistry;
use orchestration::EventBus;

/// One scripted reply from the stub tool server
#[derive(Debug, Clone)]
pub enum StubReply {
    /// Successful call returning this text
    Text(String),
    /// Call reaches the server but the tool reports failure
    Fail(String),
    /// Transport-level failure
    Unreachable,
}

impl StubReply {
    fn into_outcome(self) -> BackendResult<ToolCallOutcome> {
        match self {
            StubReply::Text(text) => Ok(ToolCallOutcome {
                success: true,
                result: Some(serde_json::json!({ "text": text })),
                error: None,
                latency_ms: 5,
            }),
            StubReply::Fail(error) => Ok(ToolCallOutcome {
                success: false,
                result: None,
                error: Some(error),
                latency_ms: 5,
            }),
            StubReply::Unreachable => Err(BackendError::Unavailable("connection refused".into())),
        }
    }
}

/// Scriptable tool server. Per-tool reply queues are consumed first; after
/// that the per-tool fallback repeats. Tools without any script are
/// unreachable.
#[derive(Default)]
pub struct StubToolServer {
    scripts: Mutex<HashMap<String, VecDeque<StubReply>>>,
    fallbacks: Mutex<HashMap<String, StubReply>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    down: Mutex<bool>,
}

impl StubToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, tool: &str, text: &str) -> Self {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(tool.to_string(), StubReply::Text(text.to_string()));
        self
    }

    pub fn script(self, tool: &str, replies: Vec<StubReply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(tool.to_string(), replies.into());
        self
    }

    pub fn unreachable(self) -> Self {
        *self.down.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(n, _)| n == tool).count()
    }
}

#[async_trait]
impl ToolServer for StubToolServer {
    async fn list_tools(&self) -> BackendResult<Vec<ToolDefinition>> {
        let fallbacks = self.fallbacks.lock().unwrap();
        Ok(fallbacks
            .keys()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: String::new(),
                parameters_schema: serde_json::json!({}),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> BackendResult<ToolCallOutcome> {
        self.calls.lock().unwrap().push((name.to_string(), params));

        if *self.down.lock().unwrap() {
            return Err(BackendError::Unavailable("server down".into()));
        }

        if let Some(reply) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|queue| queue.pop_front())
        {
            return reply.into_outcome();
        }
        if let Some(reply) = self.fallbacks.lock().unwrap().get(name).cloned() {
            return reply.into_outcome();
        }
        Err(BackendError::NotFound(name.to_string()))
    }

    async fn health(&self) -> Health {
        if *self.down.lock().unwrap() {
            Health::Down
        } else {
            Health::Ok
        }
    }
}

/// Scriptable local reasoner: a queue of answers, then a repeating fallback.
pub struct StubReasoner {
    queue: Mutex<VecDeque<String>>,
    fallback: String,
    requests: Mutex<u64>,
}

impl StubReasoner {
    pub fn new(fallback: &str) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            requests: Mutex::new(0),
        }
    }

    pub fn queued(self, answers: Vec<&str>) -> Self {
        *self.queue.lock().unwrap() = answers.into_iter().map(String::from).collect();
        self
    }

    pub fn requests(&self) -> u64 {
        *self.requests.lock().unwrap()
    }
}

#[async_trait]
impl LocalReasoner for StubReasoner {
    async fn process(
        &self,
        _query: &str,
        _caller: &CallerIdentity,
    ) -> BackendResult<ReasonerReply> {
        *self.requests.lock().unwrap() += 1;
        let answer = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(ReasonerReply {
            answer,
            strategy: "agent_loop".to_string(),
            latency_ms: 7,
            diagnostics: vec![],
        })
    }

    async fn stats(&self) -> ReasonerStats {
        ReasonerStats {
            requests: *self.requests.lock().unwrap(),
            failures: 0,
            avg_latency_ms: 7,
        }
    }
}

/// A fully wired orchestrator over stub backends.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub consensus: Arc<ConsensusEngine>,
    pub memory: Arc<TieredMemoryStore>,
    pub tools: Arc<StubToolServer>,
    pub reasoner: Option<Arc<StubReasoner>>,
}

pub struct HarnessBuilder {
    tools: StubToolServer,
    reasoner: Option<StubReasoner>,
    settings: OrchestratorSettings,
    consensus_defaults: ConsensusDefaults,
    strategy: DecisionStrategy,
    capabilities: Option<Vec<String>>,
}

impl HarnessBuilder {
    pub fn new(tools: StubToolServer) -> Self {
        Self {
            tools,
            reasoner: None,
            settings: OrchestratorSettings {
                consensus_poll_ms: 10,
                ..Default::default()
            },
            consensus_defaults: ConsensusDefaults::default(),
            strategy: DecisionStrategy::Balanced,
            capabilities: None,
        }
    }

    /// Restrict the tool server's advertised capability tags.
    pub fn with_capabilities(mut self, tags: &[&str]) -> Self {
        self.capabilities = Some(tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_reasoner(mut self, reasoner: StubReasoner) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    pub fn with_settings(mut self, f: impl FnOnce(&mut OrchestratorSettings)) -> Self {
        f(&mut self.settings);
        self
    }

    pub fn with_consensus(mut self, f: impl FnOnce(&mut ConsensusDefaults)) -> Self {
        f(&mut self.consensus_defaults);
        self
    }

    pub fn build(self) -> Harness {
        let events = EventBus::new().shared();
        let tools = Arc::new(self.tools);
        let reasoner = self.reasoner.map(Arc::new);
        let memory = Arc::new(TieredMemoryStore::with_defaults());

        let capability_map = match self.capabilities {
            Some(tags) => {
                CapabilityMap::from_pairs(tags.iter().map(|t| (t.clone(), t.clone())))
            }
            None => CapabilityMap::identity(),
        };
        let registry = Arc::new(BackendRegistry::new(capability_map, reasoner.is_some()));
        let consensus = Arc::new(
            ConsensusEngine::new(&self.consensus_defaults, None, Some(events.clone()))
                .expect("consensus defaults are valid"),
        );
        let meta = Arc::new(Introspector::new(self.strategy));

        let orchestrator = Arc::new(Orchestrator::new(
            tools.clone() as Arc<dyn ToolServer>,
            reasoner
                .clone()
                .map(|r| r as Arc<dyn LocalReasoner>),
            memory.clone() as Arc<dyn MemoryStore>,
            meta,
            consensus.clone(),
            registry,
            events,
            self.settings,
        ));

        Harness {
            orchestrator,
            consensus,
            memory,
            tools,
            reasoner,
        }
    }
}

/// Wrap a harness into gateway state for HTTP-level tests.
pub fn app_state(
    harness: &Harness,
    rate_per_minute: u32,
    max_concurrent: usize,
    operator_token: &str,
) -> orchestration::AppState {
    use orchestration::planning::StrategicPlanner;
    use orchestration::rollout::FlagStore;
    use orchestration::RateLimiter;
    use std::collections::BTreeMap;
    use tokio::sync::Semaphore;

    orchestration::AppState {
        orchestrator: harness.orchestrator.clone(),
        planner: Arc::new(StrategicPlanner::new(4, 2, None)),
        consensus: harness.consensus.clone(),
        flags: Arc::new(FlagStore::ephemeral(&BTreeMap::new())),
        limiter: Arc::new(RateLimiter::new(rate_per_minute)),
        permits: Arc::new(Semaphore::new(max_concurrent)),
        max_concurrent,
        operator_token: Arc::new(operator_token.to_string()),
        started_at: std::time::Instant::now(),
    }
}

/// A long, on-topic greeting answer that scores well.
pub fn good_greeting() -> String {
    "Hello there! It's good to hear from you. How can I help you today? \
     I can answer questions, run research, or look at attachments."
        .to_string()
}
