//! turnkeeper binary — composition root and CLI demo transport.
//!
//! Wires configuration, the LLM gateway, resolver/entity-resolver/executor
//! registries and the checkpoint store into one [`PipelineOrchestrator`],
//! then hands control to the stdin/stdout demo adapter. Also runs the two
//! background sweeps the ambient stack calls for: idle conversation
//! eviction and expired-checkpoint cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use turnkeeper::adapters::cli;
use turnkeeper::checkpoint::InMemoryCheckpointStore;
use turnkeeper::config::Config;
use turnkeeper::entities::{
    calendar_entity_resolver, email_entity_resolver, memory_entity_resolver,
    task_entity_resolver, EntityResolverRegistry,
};
use turnkeeper::executors::fake::InMemoryExecutor;
use turnkeeper::executors::ExecutorRegistry;
use turnkeeper::hitl::HitlGate;
use turnkeeper::llm::{LlmGateway, OllamaGateway, OpenAiCompatibleGateway};
use turnkeeper::logging;
use turnkeeper::memory::ConversationMemory;
use turnkeeper::orchestrator::PipelineOrchestrator;
use turnkeeper::planner::Planner;
use turnkeeper::resolvers::{
    calendar_resolver, email_resolver, general_resolver, memory_resolver, meta_resolver,
    task_store_resolver, ResolverRegistry,
};

/// turnkeeper — conversational request-processing pipeline demo.
#[derive(Parser, Debug)]
#[command(name = "turnkeeper", about = "Conversational request-processing pipeline")]
struct Cli {
    /// Local UTC offset in seconds, used to interpret relative time phrases.
    #[arg(long, default_value_t = 0)]
    utc_offset_seconds: i32,

    /// Directory for rotated JSON log files.
    #[arg(long, default_value = "logs")]
    logs_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli_args = Cli::parse();
    let _log_guard = logging::init(std::path::Path::new(&cli_args.logs_dir))
        .context("failed to initialize logging")?;

    let config = Config::load().context("failed to load configuration")?;
    let gateway = build_gateway(&config);

    let memory = Arc::new(ConversationMemory::new(config.memory.clone()));
    let checkpoints = Arc::new(InMemoryCheckpointStore::new(
        Duration::from_secs(config.checkpoint.ttl_secs),
        config.checkpoint.max_entries,
    ));

    let orchestrator = Arc::new(build_orchestrator(
        &config,
        gateway,
        memory.clone(),
        checkpoints.clone(),
        cli_args.utc_offset_seconds,
    ));

    spawn_background_sweeps(memory, checkpoints);

    cli::run(orchestrator).await.context("CLI adapter exited with an error")
}

/// Pick the cloud provider when an API key is configured, otherwise the
/// local Ollama-compatible one (ambient LLM stack).
fn build_gateway(config: &Config) -> Arc<dyn LlmGateway> {
    if let Some(cloud) = &config.llm.cloud {
        Arc::new(OpenAiCompatibleGateway::new(cloud.base_url.clone(), cloud.api_key.clone()))
    } else {
        Arc::new(OllamaGateway::new(config.llm.local.base_url.clone()))
    }
}

fn build_orchestrator(
    config: &Config,
    gateway: Arc<dyn LlmGateway>,
    memory: Arc<ConversationMemory>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    utc_offset_seconds: i32,
) -> PipelineOrchestrator {
    let model = &config.planner.model;

    let planner = Planner::new(
        gateway.clone(),
        model.clone(),
        config.planner.temperature,
        config.planner.max_tokens,
    );

    let mut resolvers = ResolverRegistry::new();
    resolvers.register(calendar_resolver(gateway.clone(), model.clone()));
    resolvers.register(task_store_resolver(gateway.clone(), model.clone()));
    resolvers.register(email_resolver(gateway.clone(), model.clone()));
    resolvers.register(memory_resolver(gateway.clone(), model.clone()));
    resolvers.register(general_resolver(gateway.clone(), model.clone()));
    resolvers.register(meta_resolver(gateway.clone(), model.clone()));

    let mut entity_resolvers = EntityResolverRegistry::new();
    let mut executors = ExecutorRegistry::new();

    let calendar_exec = Arc::new(InMemoryExecutor::new("calendar"));
    entity_resolvers.register(calendar_entity_resolver(calendar_exec.clone(), &config.thresholds));
    executors.register("calendar_event", calendar_exec);

    let task_exec = Arc::new(InMemoryExecutor::new("task_store"));
    entity_resolvers.register(task_entity_resolver(task_exec.clone(), &config.thresholds));
    executors.register("task", task_exec);

    let email_exec = Arc::new(InMemoryExecutor::new("email"));
    entity_resolvers.register(email_entity_resolver(email_exec.clone(), &config.thresholds));
    executors.register("email", email_exec);

    let memory_exec = Arc::new(InMemoryExecutor::new("memory"));
    entity_resolvers.register(memory_entity_resolver(memory_exec.clone(), &config.thresholds));
    executors.register("memory_fact", memory_exec);

    let hitl = HitlGate::new(gateway, model.clone(), config.thresholds.confidence_threshold);

    PipelineOrchestrator::new(
        memory,
        planner,
        resolvers,
        entity_resolvers,
        executors,
        hitl,
        checkpoints,
        utc_offset_seconds,
    )
}

/// Periodic idle-conversation and expired-checkpoint sweeps.
fn spawn_background_sweeps(memory: Arc<ConversationMemory>, checkpoints: Arc<InMemoryCheckpointStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let idle = memory.cleanup_idle();
            let expired = checkpoints.sweep_expired();
            if idle > 0 || expired > 0 {
                tracing::debug!(idle, expired, "background sweep evicted stale state");
            }
        }
    });
}
