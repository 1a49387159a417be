//! Process entry point.
//!
//! Exit codes: 0 normal, 2 configuration error, 3 required backend
//! unreachable at startup under `--strict`, 130 interrupted.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use backends::{
    CapabilityMap, Health, HttpReasoner, HttpToolServer, LocalReasoner, MemoryConfig,
    MemoryStore, TieredMemoryStore, ToolServer,
};

use orchestration::consensus::ConsensusEngine;
use orchestration::gateway::{self, AppState, RateLimiter};
use orchestration::metacognition::{DecisionStrategy, Introspector};
use orchestration::orchestrator::{Orchestrator, OrchestratorSettings};
use orchestration::planning::StrategicPlanner;
use orchestration::registry::{BackendId, BackendRegistry};
use orchestration::rollout::FlagStore;
use orchestration::{Config, EventBus};

const EXIT_CONFIG: i32 = 2;
const EXIT_BACKEND: i32 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "hlcsd", version, about = "Autonomous orchestration layer")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the listen address from configuration
    #[arg(long)]
    listen: Option<String>,

    /// Fail startup when the tool server is unreachable
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Log filter, e.g. "info" or "orchestration=debug"
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Some(listen) = args.listen {
        config.listen_address = listen;
    }

    std::process::exit(run(config, args.strict).await);
}

async fn run(config: Config, strict: bool) -> i32 {
    let capability_map = CapabilityMap::from_pairs(
        config
            .capabilities
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );

    let tools: Arc<dyn ToolServer> = match HttpToolServer::new(
        &config.backends.tool_server.url,
        config.backends.tool_server.timeout_ms,
        config.backends.tool_server.retries,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "tool server client construction failed");
            return EXIT_CONFIG;
        }
    };

    let tool_health = tools.health().await;
    info!(health = %tool_health, url = %config.backends.tool_server.url, "tool server probed");
    if strict && tool_health == Health::Down {
        error!("tool server unreachable and --strict is set");
        return EXIT_BACKEND;
    }

    let reasoner: Option<Arc<dyn LocalReasoner>> = if config.backends.local_reasoner.enabled {
        match HttpReasoner::new(
            &config.backends.local_reasoner.url,
            config.backends.local_reasoner.timeout_ms,
        ) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                error!(error = %e, "local reasoner client construction failed");
                return EXIT_CONFIG;
            }
        }
    } else {
        None
    };

    let memory: Arc<dyn MemoryStore> = Arc::new(TieredMemoryStore::new(MemoryConfig {
        stm_ttl_hours: config.memory.stm_ttl_hours,
        ltm_promotion_threshold: config.memory.ltm_promotion_threshold,
        stm_capacity: 1000,
    }));

    let events = EventBus::new().shared();

    let registry = Arc::new(BackendRegistry::new(
        capability_map,
        config.backends.local_reasoner.enabled,
    ));
    registry.set_status(BackendId::ToolServer, tool_health);

    let consensus = match ConsensusEngine::new(
        &config.consensus_defaults,
        Some(config.participants_path()),
        Some(events.clone()),
    ) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "consensus engine construction failed");
            return EXIT_CONFIG;
        }
    };

    let flags = match FlagStore::open(&config.feature_flags, Some(config.flags_path())) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "feature flag store construction failed");
            return EXIT_CONFIG;
        }
    };

    let default_strategy = DecisionStrategy::from_name(&config.strategy_default)
        .unwrap_or(DecisionStrategy::Adaptive);
    let meta = Arc::new(Introspector::new(default_strategy));

    let planner = Arc::new(StrategicPlanner::new(
        config.plan_concurrency,
        config.max_step_attempts,
        Some(events.clone()),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        tools,
        reasoner,
        memory,
        meta,
        consensus.clone(),
        registry,
        events,
        OrchestratorSettings::from(&config),
    ));

    let state = AppState {
        orchestrator,
        planner,
        consensus,
        flags,
        limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute)),
        permits: Arc::new(Semaphore::new(config.max_concurrent_requests)),
        max_concurrent: config.max_concurrent_requests,
        operator_token: Arc::new(config.operator_token.clone()),
        started_at: std::time::Instant::now(),
    };
    let router = gateway::build_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %config.listen_address, error = %e, "bind failed");
            return EXIT_CONFIG;
        }
    };
    info!(address = %config.listen_address, "listening");

    let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let shutdown_flag = interrupted.clone();
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            info!("interrupt received, shutting down");
        }
    });

    if let Err(e) = serve.await {
        error!(error = %e, "server error");
        return 1;
    }

    if interrupted.load(std::sync::atomic::Ordering::SeqCst) {
        EXIT_INTERRUPTED
    } else {
        0
    }
}
