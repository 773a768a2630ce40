// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)
// Allow clippy warnings for CLI application
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! CIRIS agent CLI: parses flags and environment hints, registers the
//! bundled adapters in `main()`, and runs the agent processor to
//! completion. Exit code 0 on a clean shutdown, non-zero on
//! initialization failure.

mod adapters;

use adapters::{CliComms, ConsoleWiseAuthority, GraphAudit};
use anyhow::{bail, Context, Result};
use ciris::agent::{AgentConfig, AgentProcessor};
use ciris::conscience::{ConscienceConfig, ConscienceEngine};
use ciris::config::ConfigService;
use ciris::context::{AgentIdentity, AppContext, ShutdownSignal, WorkflowLimits};
use ciris::dispatch::{ActionDispatcher, DispatchContext};
use ciris::dma::results::{ActionSelectionResult, HandlerAction};
use ciris::dma::{
    DmaOrchestrator, LlmActionSelection, LlmCommonSenseDma, LlmDomainDma, LlmEthicalDma,
};
use ciris::handlers::{default_handlers, HandlerDeps};
use ciris::incidents::{IncidentCaptureLayer, IncidentWriter};
use ciris::persistence::SqliteStore;
use ciris::processors::batch::ProcessorDeps;
use ciris::processors::ThoughtProcessor;
use ciris::registry::{Priority, Provider, ServiceHandle, ServiceRegistry};
use ciris::services::time::{SystemClock, TimeSource};
use ciris::services::traits::MemoryService;
use ciris::services::ServiceType;
use ciris::tasks::{Task, TaskStatus, Thought};
use ciris_mock_llm::MockLlm;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Transport adapters the binary knows how to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Chat transport (external; falls back to the CLI transport here)
    Discord,
    /// Terminal transport
    Cli,
    /// HTTP transport (external; falls back to the CLI transport here)
    Api,
}

/// CIRIS agent runtime
#[derive(Parser, Debug)]
#[command(name = "ciris")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CIRIS autonomous agent runtime", long_about = None)]
struct Args {
    /// Transport mode(s) to register
    #[arg(long, value_enum, default_value = "cli")]
    mode: Vec<Mode>,

    /// Additional adapter (same values as --mode, repeatable)
    #[arg(long, value_enum)]
    adapter: Vec<Mode>,

    /// Agent profile name
    #[arg(long, env = "CIRIS_PROFILE", default_value = "ciris")]
    profile: String,

    /// Path to a configuration file (JSON key/value map)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host for the api mode
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Bind port for the api mode
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Disable the interactive console
    #[arg(long)]
    no_interactive: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Use the deterministic mock LLM provider
    #[arg(long)]
    mock_llm: bool,

    /// Stop the agent after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Preload task descriptions (repeatable)
    #[arg(long)]
    task: Vec<String>,

    /// Invoke a single handler directly and exit
    #[arg(long)]
    handler: Option<String>,

    /// JSON parameters for --handler
    #[arg(long)]
    params: Option<String>,

    /// Cap on processing rounds
    #[arg(long, env = "CIRIS_MAX_ROUNDS")]
    max_rounds: Option<u32>,

    /// Data directory for the embedded store and incident logs
    #[arg(long, env = "CIRIS_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

fn init_logging(
    debug: bool,
    data_dir: &PathBuf,
    clock: Arc<dyn TimeSource>,
    graph: Arc<dyn MemoryService>,
) -> Result<IncidentWriter> {
    let default_level = if debug { "debug" } else { "info" };
    // LOG_LEVEL is the documented knob; RUST_LOG also works via EnvFilter.
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| default_level.to_string());

    let (capture, rx) = IncidentCaptureLayer::new(data_dir.join("logs"), "incidents", clock)
        .context("failed to open incident log")?;
    let writer = IncidentWriter::spawn(rx, graph);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .with(capture)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(writer)
}

async fn apply_config_file(config: &ConfigService, path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&raw).context("config file is not a JSON object")?;
    for (key, value) in parsed {
        let config_value = match value {
            serde_json::Value::String(text) => ciris::config::ConfigValue::String(text),
            serde_json::Value::Bool(flag) => ciris::config::ConfigValue::Bool(flag),
            serde_json::Value::Number(number) if number.is_i64() => {
                ciris::config::ConfigValue::Int(number.as_i64().unwrap_or(0))
            }
            serde_json::Value::Number(number) => {
                ciris::config::ConfigValue::Float(number.as_f64().unwrap_or(0.0))
            }
            serde_json::Value::Array(items) => ciris::config::ConfigValue::List(items),
            serde_json::Value::Object(map) => ciris::config::ConfigValue::Dict(map),
            serde_json::Value::Null => continue,
        };
        config
            .set(&key, config_value, "config_file")
            .await
            .map_err(|error| anyhow::anyhow!("config load failed for {key}: {error}"))?;
    }
    Ok(())
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut modes = args.mode.clone();
    modes.extend(args.adapter.iter().copied());
    for mode in &modes {
        if *mode != Mode::Cli {
            eprintln!(
                "note: {mode:?} transport is an external adapter; using the CLI transport"
            );
        }
    }

    // Environment hints are optional; absence never fails startup.
    if std::env::var("DISCORD_BOT_TOKEN").is_ok() && !modes.contains(&Mode::Discord) {
        eprintln!("note: DISCORD_BOT_TOKEN set but discord mode not requested");
    }

    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./ciris_data"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
    let store = Arc::new(
        SqliteStore::open(data_dir.join("ciris.db"), clock.clone())
            .await
            .map_err(|error| anyhow::anyhow!("failed to open store: {error}"))?,
    );
    let graph: Arc<dyn MemoryService> = store.clone();

    let _incident_writer = init_logging(args.debug, &data_dir, clock.clone(), graph.clone())?;
    info!(profile = %args.profile, "starting ciris runtime");

    // Registry and adapters. Adapters register here, in main, not inside
    // the core.
    let registry = Arc::new(ServiceRegistry::new());
    registry.set_required(vec![
        ServiceType::Communication,
        ServiceType::Llm,
        ServiceType::Memory,
    ]);
    registry.register_global(Provider::new(
        "cli-comms",
        ServiceHandle::Communication(Arc::new(CliComms::new("cli"))),
        Priority::Critical,
        ["send_message".to_string(), "fetch_messages".to_string()],
    ));
    registry.register_global(Provider::new(
        "console-wise-authority",
        ServiceHandle::WiseAuthority(Arc::new(ConsoleWiseAuthority)),
        Priority::Normal,
        [],
    ));
    registry.register_global(Provider::new(
        "graph-memory",
        ServiceHandle::Memory(graph.clone()),
        Priority::Critical,
        [],
    ));
    registry.register_global(Provider::new(
        "graph-audit",
        ServiceHandle::Audit(Arc::new(GraphAudit::new(graph.clone(), clock.clone()))),
        Priority::Normal,
        [],
    ));

    if args.mock_llm {
        registry.register_global(Provider::new(
            "mock-llm",
            ServiceHandle::Llm(Arc::new(MockLlm::new())),
            Priority::Normal,
            ["call_structured".to_string()],
        ));
    } else {
        bail!("no LLM provider client is bundled; run with --mock-llm or register one");
    }

    let config_service = Arc::new(ConfigService::new(graph.clone(), clock.clone()));
    if let Some(path) = &args.config {
        apply_config_file(&config_service, path).await?;
    }
    config_service
        .set("agent.mode", "cli", "startup")
        .await
        .ok();
    config_service
        .set("agent.profile", args.profile.as_str(), "startup")
        .await
        .ok();

    let identity = AgentIdentity {
        name: args.profile.clone(),
        role: config_service
            .get_string("agent.role", "autonomous agent")
            .await,
        domain: config_service.get_string("agent.domain", "general").await,
    };
    let limits = WorkflowLimits {
        max_active_tasks: config_service.get_i64("limits.max_active_tasks", 10).await as usize,
        max_active_thoughts: config_service
            .get_i64("limits.max_active_thoughts", 50)
            .await as usize,
        ..WorkflowLimits::default()
    };

    let handler_deps = HandlerDeps::new(store.clone(), registry.clone(), clock.clone());
    let handlers = default_handlers(handler_deps);
    let dispatcher = Arc::new(ActionDispatcher::new(
        handlers,
        registry.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    ));

    // Direct handler invocation mode.
    if let Some(handler_name) = &args.handler {
        return invoke_handler(
            handler_name,
            args.params.as_deref(),
            &dispatcher,
            store.clone(),
            clock.clone(),
        )
        .await;
    }

    let dma = DmaOrchestrator::new(
        Arc::new(LlmEthicalDma::new(registry.clone())),
        Arc::new(LlmCommonSenseDma::new(registry.clone())),
        Arc::new(LlmDomainDma::new(registry.clone())),
        Arc::new(LlmActionSelection::new(registry.clone())),
        Duration::from_secs(30),
    );
    let conscience = ConscienceEngine::new(registry.clone(), ConscienceConfig::default());
    let thoughts = Arc::new(ThoughtProcessor::new(
        dma,
        conscience,
        identity.clone(),
        limits.clone(),
    ));
    let deps = Arc::new(ProcessorDeps {
        store: store.clone(),
        correlations: store.clone(),
        registry: registry.clone(),
        dispatcher,
        thoughts,
        clock: clock.clone(),
        limits: limits.clone(),
    });

    let shutdown = ShutdownSignal::new();
    let ctx = AppContext {
        registry,
        clock,
        shutdown: shutdown.clone(),
        config: config_service,
        identity,
        limits,
    };

    let mut agent_config = AgentConfig {
        max_rounds: args.max_rounds,
        preload_tasks: args.task.clone(),
        ..AgentConfig::default()
    };
    if args.mock_llm {
        agent_config = agent_config.fast();
    }
    let agent = AgentProcessor::new(ctx, deps, graph, agent_config);

    // OS signals set the shutdown flag on the context; no globals.
    let signal_handle = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_handle.request("SIGINT received");
        }
    });
    if let Some(timeout_secs) = args.timeout {
        let timeout_handle = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            timeout_handle.request(format!("timeout after {timeout_secs}s"));
        });
    }

    agent
        .run()
        .await
        .map_err(|error| anyhow::anyhow!("agent run failed: {error}"))?;

    let status = agent
        .status()
        .await
        .map_err(|error| anyhow::anyhow!("status read failed: {error}"))?;
    info!(
        state = %status.state,
        rounds = status.round_number,
        thoughts = status.queue.total(),
        "agent stopped"
    );
    Ok(())
}

async fn invoke_handler(
    handler_name: &str,
    params: Option<&str>,
    dispatcher: &ActionDispatcher,
    store: Arc<SqliteStore>,
    clock: Arc<dyn TimeSource>,
) -> Result<()> {
    use ciris::persistence::TaskStore;

    let action = match handler_name {
        "speak" => HandlerAction::Speak,
        "ponder" => HandlerAction::Ponder,
        "defer" => HandlerAction::Defer,
        "reject" => HandlerAction::Reject,
        "task_complete" => HandlerAction::TaskComplete,
        "memorize" => HandlerAction::Memorize,
        "recall" => HandlerAction::Recall,
        "forget" => HandlerAction::Forget,
        "tool" => HandlerAction::Tool,
        "observe" => HandlerAction::Observe,
        other => bail!("unknown handler '{other}'"),
    };
    let parameters: serde_json::Value = match params {
        Some(raw) => serde_json::from_str(raw).context("--params is not valid JSON")?,
        None => serde_json::json!({}),
    };

    let task = Task::new(
        format!("direct_{}", uuid::Uuid::new_v4().simple()),
        "cli",
        format!("direct {handler_name} invocation"),
        0,
        clock.now(),
    )
    .with_status(TaskStatus::Active);
    store
        .insert_task(task.clone())
        .await
        .map_err(|error| anyhow::anyhow!("{error}"))?;
    let mut thought = Thought::seed(&task, 0, clock.now());
    thought.status = ciris::tasks::ThoughtStatus::Processing;
    store
        .insert_thought(thought.clone())
        .await
        .map_err(|error| anyhow::anyhow!("{error}"))?;

    let selection = ActionSelectionResult::new(action, parameters, "direct invocation");
    let context = DispatchContext::for_thought(&thought, "cli", 0);
    dispatcher
        .dispatch(&selection, &thought, &context)
        .await
        .map_err(|error| anyhow::anyhow!("dispatch failed: {error}"))?;

    let final_thought = store
        .get_thought(&thought.thought_id)
        .await
        .map_err(|error| anyhow::anyhow!("{error}"))?
        .context("thought vanished")?;
    println!(
        "{}",
        serde_json::json!({
            "thought_id": final_thought.thought_id,
            "status": final_thought.status,
            "final_action": final_thought.final_action,
        })
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
