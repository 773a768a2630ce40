// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shared harness for the end-to-end suites: a fully wired agent over
//! in-memory stores, the mock LLM, and a recording transport.

#![allow(dead_code)]

use async_trait::async_trait;
use ciris::agent::{AgentConfig, AgentProcessor};
use ciris::conscience::{ConscienceConfig, ConscienceEngine};
use ciris::config::ConfigService;
use ciris::context::{AgentIdentity, AppContext, ShutdownSignal, WorkflowLimits};
use ciris::dispatch::ActionDispatcher;
use ciris::dma::{
    ActionSelectionDma, DmaOrchestrator, EthicalDma, LlmActionSelection, LlmCommonSenseDma,
    LlmDomainDma, LlmEthicalDma,
};
use ciris::errors::Result;
use ciris::graph::InMemoryGraphStore;
use ciris::handlers::{default_handlers, HandlerDeps};
use ciris::persistence::InMemoryStore;
use ciris::processors::batch::ProcessorDeps;
use ciris::processors::dream::DreamConfig;
use ciris::processors::ThoughtProcessor;
use ciris::registry::{Priority, Provider, ServiceHandle, ServiceRegistry};
use ciris::services::time::{SystemClock, TimeSource};
use ciris::services::traits::CommunicationService;
use ciris_mock_llm::MockLlm;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Transport that records everything sent through it.
pub struct RecordingComms {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingComms {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl CommunicationService for RecordingComms {
    async fn send_message(&self, channel: &str, content: &str) -> Result<()> {
        self.sent
            .lock()
            .push((channel.to_string(), content.to_string()));
        Ok(())
    }

    async fn fetch_messages(&self, _channel: &str, _limit: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn default_channel(&self) -> Option<String> {
        Some("test-channel".to_string())
    }
}

/// Everything a scenario needs to drive and inspect the agent.
pub struct Harness {
    pub agent: AgentProcessor,
    pub store: Arc<InMemoryStore>,
    pub graph: Arc<InMemoryGraphStore>,
    pub registry: Arc<ServiceRegistry>,
    pub shutdown: ShutdownSignal,
    pub comms: Arc<RecordingComms>,
    pub deps: Arc<ProcessorDeps>,
}

pub struct HarnessOptions {
    pub selector: Option<Arc<dyn ActionSelectionDma>>,
    pub ethical: Option<Arc<dyn EthicalDma>>,
    pub max_rounds: Option<u32>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            selector: None,
            ethical: None,
            max_rounds: None,
        }
    }
}

/// Wire the full stack: mock LLM behind the registry, in-memory stores,
/// default handlers, fast agent cadence.
pub fn build(options: HarnessOptions) -> Harness {
    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
    let registry = Arc::new(ServiceRegistry::new());
    let comms = Arc::new(RecordingComms::new());

    registry.register_global(Provider::new(
        "test-comms",
        ServiceHandle::Communication(comms.clone()),
        Priority::Critical,
        [],
    ));
    registry.register_global(Provider::new(
        "mock-llm",
        ServiceHandle::Llm(Arc::new(MockLlm::new())),
        Priority::Normal,
        ["call_structured".to_string()],
    ));
    registry.register_global(Provider::new(
        "graph-memory",
        ServiceHandle::Memory(graph.clone()),
        Priority::Critical,
        [],
    ));

    let handlers = default_handlers(HandlerDeps::new(
        store.clone(),
        registry.clone(),
        clock.clone(),
    ));
    let dispatcher = Arc::new(ActionDispatcher::new(
        handlers,
        registry.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    ));

    let identity = AgentIdentity::default();
    let limits = WorkflowLimits::default();
    let ethical = options
        .ethical
        .unwrap_or_else(|| Arc::new(LlmEthicalDma::new(registry.clone())));
    let selector = options
        .selector
        .unwrap_or_else(|| Arc::new(LlmActionSelection::new(registry.clone())));
    let dma = DmaOrchestrator::new(
        ethical,
        Arc::new(LlmCommonSenseDma::new(registry.clone())),
        Arc::new(LlmDomainDma::new(registry.clone())),
        selector,
        Duration::from_secs(5),
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
    let config_service = Arc::new(ConfigService::new(graph.clone(), clock.clone()));
    let ctx = AppContext {
        registry: registry.clone(),
        clock,
        shutdown: shutdown.clone(),
        config: config_service,
        identity,
        limits,
    };
    let agent_config = AgentConfig {
        max_rounds: options.max_rounds,
        schedule_initial_dream: false,
        dream: DreamConfig {
            min_duration: chrono::Duration::seconds(0),
            max_duration: chrono::Duration::minutes(60),
        },
        ..AgentConfig::default()
    }
    .fast();
    let agent = AgentProcessor::new(ctx, deps.clone(), graph.clone(), agent_config);

    Harness {
        agent,
        store,
        graph,
        registry,
        shutdown,
        comms,
        deps,
    }
}
