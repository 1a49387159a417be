//! Process configuration.
//!
//! A single JSON file provides every knob; `HLCS_`-prefixed environment
//! variables override file values using the upper-snake-case key path
//! (for example `HLCS_BACKENDS_TOOL_SERVER_URL` or `HLCS_MAX_ITERATIONS`).
//! Feature-flag toggles use `HLCS_FEATURE_<NAME>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Defaults applied when opening a consensus decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusDefaults {
    /// Consensus rule name: weighted | simple_majority | supermajority | unanimous | adaptive
    pub r#type: String,
    pub deadline_ms: u64,
    pub role_weights: RoleWeightConfig,
    /// Whether registered autonomous agents vote automatically
    pub auto_vote_agents: bool,
    /// Risk bound below which an agent auto-approves a recommended option
    pub agent_risk_threshold: f64,
}

impl Default for ConsensusDefaults {
    fn default() -> Self {
        Self {
            r#type: "adaptive".to_string(),
            deadline_ms: 30_000,
            role_weights: RoleWeightConfig::default(),
            auto_vote_agents: true,
            agent_risk_threshold: 0.5,
        }
    }
}

/// Voting weights by role; renormalized over present voters at tally time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleWeightConfig {
    pub primary_user: f64,
    pub administrator: f64,
    pub autonomous_agent: f64,
    pub observer: f64,
}

impl Default for RoleWeightConfig {
    fn default() -> Self {
        Self {
            primary_user: 0.60,
            administrator: 0.30,
            autonomous_agent: 0.10,
            observer: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub url: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
            timeout_ms: 30_000,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalReasonerConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for LocalReasonerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://127.0.0.1:8090".to_string(),
            timeout_ms: 120_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub tool_server: ToolServerConfig,
    pub local_reasoner: LocalReasonerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub persist_dir: PathBuf,
    pub stm_ttl_hours: i64,
    pub ltm_promotion_threshold: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("./state"),
            stm_ttl_hours: 24,
            ltm_promotion_threshold: 0.8,
        }
    }
}

/// One feature-flag entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagConfig {
    pub enabled: bool,
    /// all | percentage | whitelist
    pub strategy: String,
    pub rollout_percentage: f64,
    pub whitelist: Vec<String>,
}

impl Default for FlagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: "all".to_string(),
            rollout_percentage: 100.0,
            whitelist: Vec::new(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_address: String,
    pub request_timeout_ms: u64,
    pub max_concurrent_requests: usize,
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub complexity_threshold: f64,
    /// conservative | exploratory | balanced | adaptive
    pub strategy_default: String,
    pub consensus_defaults: ConsensusDefaults,
    pub backends: BackendsConfig,
    pub memory: MemorySection,
    pub feature_flags: BTreeMap<String, FlagConfig>,
    /// Capability tag → concrete tool name on the tool server
    pub capabilities: BTreeMap<String, String>,
    /// Global cap on concurrently running plan steps, shared across plans
    pub plan_concurrency: usize,
    /// Retries per plan step before it is marked failed
    pub max_step_attempts: u32,
    /// Requests per minute allowed per caller before rate limiting
    pub rate_limit_per_minute: u32,
    /// Token for the operator diagnostics path; empty disables it
    pub operator_token: String,
}

impl Default for Config {
    fn default() -> Self {
        let capabilities = [
            ("conversational_responder", "saul.respond"),
            ("retriever", "rag.search"),
            ("image_analyzer", "vision.analyze"),
            ("audio_transcriber", "audio.transcribe"),
            ("classifier", "trm.classify"),
            ("synthesize", "saul.synthesize"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            request_timeout_ms: 60_000,
            max_concurrent_requests: 64,
            quality_threshold: 0.7,
            max_iterations: 3,
            complexity_threshold: 0.5,
            strategy_default: "adaptive".to_string(),
            consensus_defaults: ConsensusDefaults::default(),
            backends: BackendsConfig::default(),
            memory: MemorySection::default(),
            feature_flags: BTreeMap::new(),
            capabilities,
            plan_concurrency: 4,
            max_step_attempts: 2,
            rate_limit_per_minute: 120,
            operator_token: String::new(),
        }
    }
}

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HLCS_";

impl Config {
    /// Load from a JSON file, apply env overrides, and validate.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    CoreError::invalid_input(format!("config {}: {e}", p.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    CoreError::invalid_input(format!("config {}: {e}", p.display()))
                })?
            }
            None => Self::default(),
        };

        config.apply_env(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Apply `HLCS_*` overrides from an iterator of environment pairs.
    pub fn apply_env(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if let Some(flag) = path.strip_prefix("FEATURE_") {
                let enabled = parse_bool(&value);
                self.feature_flags
                    .entry(flag.to_lowercase())
                    .or_default()
                    .enabled = enabled;
                continue;
            }
            self.apply_override(path, &value);
        }
    }

    fn apply_override(&mut self, path: &str, value: &str) {
        match path {
            "LISTEN_ADDRESS" => self.listen_address = value.to_string(),
            "REQUEST_TIMEOUT_MS" => set_parsed(&mut self.request_timeout_ms, path, value),
            "MAX_CONCURRENT_REQUESTS" => set_parsed(&mut self.max_concurrent_requests, path, value),
            "QUALITY_THRESHOLD" => set_parsed(&mut self.quality_threshold, path, value),
            "MAX_ITERATIONS" => set_parsed(&mut self.max_iterations, path, value),
            "COMPLEXITY_THRESHOLD" => set_parsed(&mut self.complexity_threshold, path, value),
            "STRATEGY_DEFAULT" => self.strategy_default = value.to_lowercase(),
            "CONSENSUS_DEFAULTS_TYPE" => {
                self.consensus_defaults.r#type = value.to_lowercase();
            }
            "CONSENSUS_DEFAULTS_DEADLINE_MS" => {
                set_parsed(&mut self.consensus_defaults.deadline_ms, path, value);
            }
            "CONSENSUS_DEFAULTS_AGENT_RISK_THRESHOLD" => {
                set_parsed(&mut self.consensus_defaults.agent_risk_threshold, path, value);
            }
            "BACKENDS_TOOL_SERVER_URL" => self.backends.tool_server.url = value.to_string(),
            "BACKENDS_TOOL_SERVER_TIMEOUT_MS" => {
                set_parsed(&mut self.backends.tool_server.timeout_ms, path, value);
            }
            "BACKENDS_TOOL_SERVER_RETRIES" => {
                set_parsed(&mut self.backends.tool_server.retries, path, value);
            }
            "BACKENDS_LOCAL_REASONER_ENABLED" => {
                self.backends.local_reasoner.enabled = parse_bool(value);
            }
            "BACKENDS_LOCAL_REASONER_URL" => {
                self.backends.local_reasoner.url = value.to_string();
            }
            "MEMORY_PERSIST_DIR" => self.memory.persist_dir = PathBuf::from(value),
            "MEMORY_STM_TTL_HOURS" => set_parsed(&mut self.memory.stm_ttl_hours, path, value),
            "MEMORY_LTM_PROMOTION_THRESHOLD" => {
                set_parsed(&mut self.memory.ltm_promotion_threshold, path, value);
            }
            "PLAN_CONCURRENCY" => set_parsed(&mut self.plan_concurrency, path, value),
            "MAX_STEP_ATTEMPTS" => set_parsed(&mut self.max_step_attempts, path, value),
            "RATE_LIMIT_PER_MINUTE" => set_parsed(&mut self.rate_limit_per_minute, path, value),
            "OPERATOR_TOKEN" => self.operator_token = value.to_string(),
            _ => tracing::warn!(key = path, "unrecognized config override ignored"),
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(CoreError::invalid_input("quality_threshold outside [0, 1]"));
        }
        if !(1..=10).contains(&self.max_iterations) {
            return Err(CoreError::invalid_input("max_iterations outside [1, 10]"));
        }
        if !(0.0..=1.0).contains(&self.complexity_threshold) {
            return Err(CoreError::invalid_input("complexity_threshold outside [0, 1]"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(CoreError::invalid_input("max_concurrent_requests must be > 0"));
        }
        if self.plan_concurrency == 0 {
            return Err(CoreError::invalid_input("plan_concurrency must be > 0"));
        }
        match self.strategy_default.as_str() {
            "conservative" | "exploratory" | "balanced" | "adaptive" => {}
            other => {
                return Err(CoreError::invalid_input(format!(
                    "unknown strategy_default '{other}'"
                )))
            }
        }
        match self.consensus_defaults.r#type.as_str() {
            "weighted" | "simple_majority" | "supermajority" | "unanimous" | "adaptive" => {}
            other => {
                return Err(CoreError::invalid_input(format!(
                    "unknown consensus type '{other}'"
                )))
            }
        }
        Ok(())
    }

    /// Path of the persisted participant registry
    pub fn participants_path(&self) -> PathBuf {
        self.memory.persist_dir.join("participants.json")
    }

    /// Path of the persisted feature-flag table
    pub fn flags_path(&self) -> PathBuf {
        self.memory.persist_dir.join("feature_flags.json")
    }
}

fn parse_bool(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value, "unparsable config override ignored"),
    }
}
