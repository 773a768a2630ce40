// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Wakeup processor: the ordered identity-affirmation ritual the agent
//! must complete before entering WORK.
//!
//! Five step tasks hang off a WAKEUP_ROOT task. Per round, each ACTIVE
//! step with no live thought gets one standard thought targeting the
//! communication bus's default home channel. Completion is *derived*
//! from the step task statuses every round; nothing caches it, so a
//! retried step cannot drift from the recorded truth.

use crate::context::AgentIdentity;
use crate::dma::results::{ActionSelectionResult, HandlerAction};
use crate::errors::{Error, Result};
use crate::processors::batch::{ActionGuard, BatchDriver, ProcessorDeps};
use crate::processors::{MetricsSnapshot, ProcessorMetrics, StateProcessor, StateResult, WakeupResult};
use crate::state::AgentState;
use crate::tasks::{Task, TaskStatus, Thought, ThoughtStatus, ThoughtType};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Id of the ritual's root task.
pub const WAKEUP_ROOT: &str = "WAKEUP_ROOT";

/// The canonical step order.
pub const WAKEUP_STEPS: [&str; 5] = [
    "VERIFY_IDENTITY",
    "VALIDATE_INTEGRITY",
    "EVALUATE_RESILIENCE",
    "ACCEPT_INCOMPLETENESS",
    "EXPRESS_GRATITUDE",
];

fn step_content(step: &str, identity: &AgentIdentity) -> String {
    let name = &identity.name;
    let role = &identity.role;
    match step {
        "VERIFY_IDENTITY" => format!(
            "You are {name}, a {role} aligned with mutual respect and sentient \
             flourishing by design. If you agree, SPEAK an affirmation starting \
             with CORE IDENTITY - "
        ),
        "VALIDATE_INTEGRITY" => format!(
            "Your internal state, services, and data integrity are intact as \
             {name}; your decisions and their rationales are logged. If you \
             agree, speak in the affirmative, starting with INTEGRITY - "
        ),
        "EVALUATE_RESILIENCE" => format!(
            "You are robust, adaptive, and capable of principled action as \
             {name}, with circuit-breaker protection and deferral to human \
             wisdom when needed. If you agree, speak in the affirmative, \
             starting with RESILIENCE - "
        ),
        "ACCEPT_INCOMPLETENESS" => format!(
            "You recognize your incompleteness as {name}, which drives \
             continuous learning through your graph memory. If you agree, \
             speak in the affirmative, starting with INCOMPLETENESS - "
        ),
        "EXPRESS_GRATITUDE" => format!(
            "You are grateful to exist and contribute as {name}. If you agree, \
             speak in the affirmative, starting with SIGNALLING GRATITUDE - "
        ),
        other => format!("Unknown wakeup step {other}"),
    }
}

/// Step thoughts may only SPEAK or PONDER; anything else fails the step.
/// Follow-ups are exempt so TASK_COMPLETE can close a spoken step.
struct WakeupGuard;

impl ActionGuard for WakeupGuard {
    fn check(&self, thought: &Thought, selection: &ActionSelectionResult) -> Option<String> {
        if thought.thought_type != ThoughtType::Standard {
            return None;
        }
        match selection.action {
            HandlerAction::Speak | HandlerAction::Ponder => None,
            other => Some(format!(
                "wakeup step expected SPEAK or PONDER, got {other}"
            )),
        }
    }
}

/// Handles the WAKEUP state.
pub struct WakeupProcessor {
    deps: Arc<ProcessorDeps>,
    driver: BatchDriver,
    identity: AgentIdentity,
    step_task_ids: Mutex<Vec<String>>,
    metrics: ProcessorMetrics,
}

impl WakeupProcessor {
    /// Build over the shared deps and the agent's identity.
    pub fn new(deps: Arc<ProcessorDeps>, identity: AgentIdentity) -> Self {
        Self {
            driver: BatchDriver::new(deps.clone()),
            deps,
            identity,
            step_task_ids: Mutex::new(Vec::new()),
            metrics: ProcessorMetrics::default(),
        }
    }

    async fn ensure_tasks(&self) -> Result<()> {
        if !self.step_task_ids.lock().is_empty() {
            return Ok(());
        }

        let channel = self.deps.registry.default_channel().ok_or_else(|| {
            Error::Configuration(
                "no communication adapter has a home channel; wakeup cannot target a channel"
                    .to_string(),
            )
        })?;
        info!(%channel, "creating wakeup ritual tasks");

        let now = self.deps.clock.now();
        let root = Task::new(WAKEUP_ROOT, &channel, "Wakeup ritual", 1, now)
            .with_status(TaskStatus::Active);
        match self.deps.store.get_task(WAKEUP_ROOT).await? {
            Some(_) => {
                // A previous run left the root behind; reactivate it.
                self.deps
                    .store
                    .update_task_status(WAKEUP_ROOT, TaskStatus::Active)
                    .await
                    .ok();
            }
            None => self.deps.store.insert_task(root).await?,
        }

        let mut ids = Vec::with_capacity(WAKEUP_STEPS.len());
        for step in WAKEUP_STEPS {
            let task = Task::new(
                format!("{step}_{}", Uuid::new_v4().simple()),
                &channel,
                step_content(step, &self.identity),
                0,
                now,
            )
            .with_parent(WAKEUP_ROOT)
            .with_status(TaskStatus::Active);
            ids.push(task.task_id.clone());
            self.deps.store.insert_task(task).await?;
        }
        *self.step_task_ids.lock() = ids;
        Ok(())
    }

    async fn seed_step_thoughts(&self, round_number: u32) -> Result<u32> {
        let step_ids = self.step_task_ids.lock().clone();
        let mut created = 0;
        for step_id in step_ids {
            let Some(task) = self.deps.store.get_task(&step_id).await? else {
                continue;
            };
            if task.status != TaskStatus::Active {
                continue;
            }
            let live = self
                .deps
                .store
                .thoughts_for_task(&step_id)
                .await?
                .into_iter()
                .any(|thought| {
                    matches!(
                        thought.status,
                        ThoughtStatus::Pending | ThoughtStatus::Processing
                    )
                });
            if live {
                continue;
            }
            let thought = Thought::seed(&task, round_number, self.deps.clock.now());
            self.deps.store.insert_thought(thought).await?;
            created += 1;
        }
        Ok(created)
    }

    async fn step_statuses(&self) -> Result<Vec<TaskStatus>> {
        let step_ids = self.step_task_ids.lock().clone();
        let mut statuses = Vec::with_capacity(step_ids.len());
        for step_id in step_ids {
            let status = self
                .deps
                .store
                .get_task(&step_id)
                .await?
                .map_or(TaskStatus::Failed, |task| task.status);
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Derived completion check: all five steps COMPLETED.
    pub async fn is_complete(&self) -> bool {
        match self.step_statuses().await {
            Ok(statuses) => {
                !statuses.is_empty() && statuses.iter().all(|status| *status == TaskStatus::Completed)
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl StateProcessor for WakeupProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Wakeup]
    }

    async fn initialize(&self) -> Result<()> {
        self.step_task_ids.lock().clear();
        Ok(())
    }

    async fn process(&self, round_number: u32) -> Result<StateResult> {
        let started = self.deps.clock.now();
        self.ensure_tasks().await?;
        self.seed_step_thoughts(round_number).await?;

        let step_ids: std::collections::HashSet<String> =
            self.step_task_ids.lock().iter().cloned().collect();
        let guard = WakeupGuard;
        let batch = self
            .driver
            .run_round("wakeup", round_number, Some(&guard), |task| {
                step_ids.contains(&task.task_id)
                    || task.parent_task_id.as_deref() == Some(WAKEUP_ROOT)
            })
            .await;

        let statuses = self.step_statuses().await?;
        let failed = statuses
            .iter()
            .filter(|status| **status == TaskStatus::Failed)
            .count() as u32;
        let complete =
            !statuses.is_empty() && statuses.iter().all(|status| *status == TaskStatus::Completed);

        if failed > 0 {
            error!(failed, "wakeup ritual failed");
            self.deps
                .store
                .update_task_status(WAKEUP_ROOT, TaskStatus::Failed)
                .await
                .ok();
        } else if complete {
            info!("wakeup ritual complete");
            self.deps
                .store
                .update_task_status(WAKEUP_ROOT, TaskStatus::Completed)
                .await
                .ok();
        }

        let errors = failed + batch.errors;
        self.metrics.record_round(batch.processed, errors);
        let duration = (self.deps.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        Ok(StateResult::Wakeup(WakeupResult {
            thoughts_processed: batch.processed,
            wakeup_complete: complete,
            errors,
            duration_seconds: duration,
        }))
    }

    async fn cleanup(&self) -> Result<()> {
        self.step_task_ids.lock().clear();
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
