// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Agent Processor
//!
//! The top-level scheduler. Owns the state machine, the round counter,
//! and the map of state processors; drives the wakeup ritual, the main
//! round loop, dream scheduling, and graceful shutdown. State
//! transitions only ever happen inside this loop.

use crate::context::AppContext;
use crate::errors::{Error, Result};
use crate::graph::{node_type, GraphScope};
use crate::persistence::QueueStatus;
use crate::processors::batch::ProcessorDeps;
use crate::processors::dream::{DreamConfig, DreamProcessor, DREAM_INTERVAL_HOURS};
use crate::processors::{
    MetricsSnapshot, PlayProcessor, ShutdownProcessor, SolitudeProcessor, StateProcessor,
    StateResult, WakeupProcessor, WorkProcessor,
};
use crate::services::traits::{MemoryQuery, MemoryService};
use crate::state::{AgentState, StateManager, StateTransitionRecord};
use crate::tasks::Task;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Agent loop tuning.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stop after this many rounds (None = run until shutdown)
    pub max_rounds: Option<u32>,
    /// Delay between WAKEUP rounds
    pub wakeup_round_delay: Duration,
    /// Delay between WORK/PLAY rounds
    pub work_round_delay: Duration,
    /// Delay between SOLITUDE rounds
    pub solitude_round_delay: Duration,
    /// Delay between DREAM rounds
    pub dream_round_delay: Duration,
    /// Consecutive round failures before global shutdown
    pub max_consecutive_errors: u32,
    /// Base unit of the per-error backoff `min(base * n, 60s)`
    pub error_backoff_base: Duration,
    /// Bounded wait for each processor's cleanup
    pub cleanup_timeout: Duration,
    /// Task descriptions loaded after WAKEUP -> WORK
    pub preload_tasks: Vec<String>,
    /// Schedule the first dream on entering WORK
    pub schedule_initial_dream: bool,
    /// Dream duration bounds
    pub dream: DreamConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: None,
            wakeup_round_delay: Duration::from_secs(5),
            work_round_delay: Duration::from_secs(3),
            solitude_round_delay: Duration::from_secs(10),
            dream_round_delay: Duration::from_secs(5),
            max_consecutive_errors: 5,
            error_backoff_base: Duration::from_secs(5),
            cleanup_timeout: Duration::from_secs(10),
            preload_tasks: Vec::new(),
            schedule_initial_dream: true,
            dream: DreamConfig::default(),
        }
    }
}

impl AgentConfig {
    /// The fast cadence used with the mock LLM.
    #[must_use]
    pub fn fast(mut self) -> Self {
        let fast = Duration::from_millis(10);
        self.wakeup_round_delay = fast;
        self.work_round_delay = fast;
        self.solitude_round_delay = fast;
        self.dream_round_delay = fast;
        self.error_backoff_base = Duration::from_millis(1);
        self
    }

    fn delay_for(&self, state: AgentState) -> Duration {
        match state {
            AgentState::Wakeup => self.wakeup_round_delay,
            AgentState::Work | AgentState::Play => self.work_round_delay,
            AgentState::Solitude => self.solitude_round_delay,
            AgentState::Dream | AgentState::Shutdown => self.dream_round_delay,
        }
    }
}

/// Point-in-time agent status.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    /// Current state
    pub state: AgentState,
    /// Seconds in the current state
    pub state_duration_secs: f64,
    /// Rounds run so far
    pub round_number: u32,
    /// Thought queue counts and recent sample
    pub queue: QueueStatus,
    /// Per-state processor counters
    pub processor_metrics: HashMap<&'static str, MetricsSnapshot>,
    /// Recent state transitions
    pub state_history: Vec<StateTransitionRecord>,
}

/// The top-level scheduler.
pub struct AgentProcessor {
    ctx: AppContext,
    deps: Arc<ProcessorDeps>,
    graph: Arc<dyn MemoryService>,
    processors: HashMap<AgentState, Arc<dyn StateProcessor>>,
    shutdown_processor: Arc<ShutdownProcessor>,
    state: Mutex<StateManager>,
    round_number: AtomicU32,
    config: AgentConfig,
}

impl AgentProcessor {
    /// Assemble the processor map and the state machine.
    pub fn new(
        ctx: AppContext,
        deps: Arc<ProcessorDeps>,
        graph: Arc<dyn MemoryService>,
        config: AgentConfig,
    ) -> Self {
        let wakeup = Arc::new(WakeupProcessor::new(deps.clone(), ctx.identity.clone()));
        let work = Arc::new(WorkProcessor::new(deps.clone()));
        let play = Arc::new(PlayProcessor::new(deps.clone()));
        let solitude = Arc::new(SolitudeProcessor::new(deps.clone()));
        let dream = Arc::new(DreamProcessor::new(
            deps.clone(),
            graph.clone(),
            ctx.config.clone(),
            config.dream.clone(),
        ));
        let shutdown_processor = Arc::new(ShutdownProcessor::new(deps.clone()));

        let mut processors: HashMap<AgentState, Arc<dyn StateProcessor>> = HashMap::new();
        processors.insert(AgentState::Wakeup, wakeup);
        processors.insert(AgentState::Work, work);
        processors.insert(AgentState::Play, play);
        processors.insert(AgentState::Solitude, solitude);
        processors.insert(AgentState::Dream, dream);
        processors.insert(AgentState::Shutdown, shutdown_processor.clone());

        Self {
            state: Mutex::new(StateManager::new(ctx.clock.clone())),
            ctx,
            deps,
            graph,
            processors,
            shutdown_processor,
            round_number: AtomicU32::new(0),
            config,
        }
    }

    /// Replace a state's processor. Intended for embedders and tests.
    pub fn set_processor(&mut self, state: AgentState, processor: Arc<dyn StateProcessor>) {
        self.processors.insert(state, processor);
    }

    /// Current state.
    pub fn current_state(&self) -> AgentState {
        self.state.lock().state()
    }

    /// Rounds run so far.
    pub fn round_number(&self) -> u32 {
        self.round_number.load(Ordering::SeqCst)
    }

    /// Request a graceful stop.
    pub fn stop_processing(&self, reason: &str) {
        self.ctx.shutdown.request(reason);
    }

    /// Current status for operators.
    pub async fn status(&self) -> Result<AgentStatus> {
        let queue = self.deps.store.queue_status().await?;
        let mut processor_metrics = HashMap::new();
        for (state, processor) in &self.processors {
            processor_metrics.insert(state.as_str(), processor.metrics());
        }
        let state = self.state.lock();
        Ok(AgentStatus {
            state: state.state(),
            state_duration_secs: state.state_duration_secs(),
            round_number: self.round_number(),
            queue,
            processor_metrics,
            state_history: state.history(10),
        })
    }

    fn next_round(&self) -> u32 {
        self.round_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn rounds_exhausted(&self) -> bool {
        self.config
            .max_rounds
            .is_some_and(|max| self.round_number() >= max)
    }

    fn processor_for(&self, state: AgentState) -> Result<Arc<dyn StateProcessor>> {
        self.processors
            .get(&state)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("no processor for state {state}")))
    }

    async fn transition(&self, target: AgentState) -> Result<()> {
        self.state.lock().transition_to(target)?;
        self.processor_for(target)?.initialize().await
    }

    /// Stop-aware inter-round delay.
    async fn round_delay(&self, state: AgentState) {
        let delay = self.config.delay_for(state);
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            () = self.ctx.shutdown.wait() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }

    async fn load_preload_tasks(&self) {
        if self.config.preload_tasks.is_empty() {
            return;
        }
        let Some(channel) = self.deps.registry.default_channel() else {
            warn!("no default channel; preload tasks dropped");
            return;
        };
        for (index, description) in self.config.preload_tasks.iter().enumerate() {
            let task = Task::new(
                format!("preload_{index}_{}", self.ctx.clock.now().timestamp()),
                &channel,
                description.clone(),
                0,
                self.ctx.clock.now(),
            );
            match self.deps.store.insert_task(task).await {
                Ok(()) => info!(%description, "created preload task"),
                Err(insert_error) => {
                    error!(%description, %insert_error, "failed to create preload task");
                }
            }
        }
    }

    async fn scheduled_dream_due(&self) -> Option<String> {
        let nodes = self
            .graph
            .recall(&MemoryQuery {
                node_id: "dream_schedule_*".to_string(),
                scope: Some(GraphScope::Local),
            })
            .await
            .ok()?;
        let now = self.ctx.clock.now();
        for node in nodes {
            if node.node_type != node_type::CONCEPT
                || node.attr_str("task_type") != Some("scheduled_dream")
            {
                continue;
            }
            let Some(scheduled_for) = node
                .attr_str("scheduled_for")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc))
            else {
                continue;
            };
            let defer_window =
                ChronoDuration::hours(node.attr_i64("defer_window_hours").unwrap_or(2));
            if now >= scheduled_for && now <= scheduled_for + defer_window {
                return Some(node.id);
            }
        }
        None
    }

    async fn run_wakeup(&self) -> Result<bool> {
        let wakeup = self.processor_for(AgentState::Wakeup)?;
        wakeup.initialize().await?;

        loop {
            if self.ctx.shutdown.is_requested() {
                return Ok(false);
            }
            if self.rounds_exhausted() {
                warn!("round budget exhausted before wakeup completed");
                return Ok(false);
            }
            let round = self.next_round();
            let result = wakeup.process(round).await?;
            let StateResult::Wakeup(result) = result else {
                return Err(Error::Configuration(
                    "wakeup processor returned a non-wakeup result".to_string(),
                ));
            };
            if result.errors > 0 {
                error!(errors = result.errors, "wakeup ritual failed");
                return Ok(false);
            }
            if result.wakeup_complete {
                info!("wakeup ritual complete, entering work");
                return Ok(true);
            }
            self.round_delay(AgentState::Wakeup).await;
        }
    }

    /// Run shutdown negotiation rounds, then clean up every processor
    /// with a bounded wait.
    async fn run_shutdown(&self) -> Result<()> {
        let reason = self
            .ctx
            .shutdown
            .reason()
            .unwrap_or_else(|| "shutdown requested".to_string());
        self.shutdown_processor.set_reason(reason);
        self.shutdown_processor.initialize().await?;

        loop {
            let round = self.next_round();
            match self.shutdown_processor.process(round).await {
                Ok(StateResult::Shutdown(result)) if result.shutdown_ready => break,
                Ok(_) => {}
                Err(shutdown_error) => {
                    error!(%shutdown_error, "shutdown round failed, proceeding to cleanup");
                    break;
                }
            }
            self.round_delay(AgentState::Shutdown).await;
        }

        for (state, processor) in &self.processors {
            if let Err(_elapsed) =
                tokio::time::timeout(self.config.cleanup_timeout, processor.cleanup()).await
            {
                warn!(state = state.as_str(), "processor cleanup timed out");
            }
        }
        info!("agent processor stopped");
        Ok(())
    }

    /// Run the agent: wakeup ritual, main loop, graceful shutdown. Returns
    /// when the agent has fully shut down.
    pub async fn run(&self) -> Result<()> {
        self.transition(AgentState::Wakeup).await?;

        if !self.run_wakeup().await? {
            self.state.lock().transition_to(AgentState::Shutdown)?;
            self.ctx
                .shutdown
                .request("wakeup ritual failed or was interrupted");
            return self.run_shutdown().await;
        }

        self.state.lock().transition_to(AgentState::Work)?;
        self.processor_for(AgentState::Work)?.initialize().await?;
        self.load_preload_tasks().await;
        if self.config.schedule_initial_dream {
            if let Err(schedule_error) = DreamProcessor::schedule_dream(
                self.graph.as_ref(),
                self.ctx.clock.now(),
                DREAM_INTERVAL_HOURS,
            )
            .await
            {
                warn!(%schedule_error, "failed to schedule initial dream");
            }
        }

        let mut consecutive_errors: u32 = 0;
        loop {
            if self.rounds_exhausted() {
                self.ctx.shutdown.request(format!(
                    "processing completed after {} rounds",
                    self.round_number()
                ));
            }

            let current = self.current_state();
            if self.ctx.shutdown.is_requested() {
                if current != AgentState::Shutdown {
                    self.state.lock().transition_to(AgentState::Shutdown)?;
                }
                return self.run_shutdown().await;
            }

            // Dream trigger, checked from WORK only.
            if current == AgentState::Work {
                if let Some(schedule_id) = self.scheduled_dream_due().await {
                    info!(%schedule_id, "scheduled dream is due");
                    self.graph
                        .forget(&schedule_id, GraphScope::Local)
                        .await
                        .ok();
                    self.transition(AgentState::Dream).await?;
                    continue;
                }
            }

            let round = self.next_round();
            let processor = self.processor_for(current)?;
            match processor.process(round).await {
                Ok(result) => {
                    consecutive_errors = 0;
                    match &result {
                        StateResult::Solitude(solitude) if solitude.should_exit_solitude => {
                            info!(
                                reason = solitude.exit_reason.as_deref().unwrap_or("unknown"),
                                "leaving solitude"
                            );
                            self.transition(AgentState::Work).await?;
                        }
                        StateResult::Dream(dream) if dream.dream_complete => {
                            info!("dream complete, returning to work");
                            self.transition(AgentState::Work).await?;
                        }
                        _ => {}
                    }
                }
                Err(round_error) => {
                    consecutive_errors += 1;
                    error!(
                        round,
                        consecutive_errors,
                        %round_error,
                        "round failed"
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        self.ctx.shutdown.request(format!(
                            "{consecutive_errors} consecutive round failures"
                        ));
                        continue;
                    }
                    let backoff = self
                        .config
                        .error_backoff_base
                        .saturating_mul(consecutive_errors)
                        .min(Duration::from_secs(60));
                    tokio::time::sleep(backoff).await;
                }
            }

            self.round_delay(self.current_state()).await;
        }
    }
}
