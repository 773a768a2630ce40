// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Work processor: normal task and thought processing in four phases per
//! round - activate tasks, seed thoughts, populate the queue, process a
//! batch.

use crate::errors::Result;
use crate::processors::batch::{BatchDriver, BatchOutcome, ProcessorDeps};
use crate::processors::{MetricsSnapshot, ProcessorMetrics, StateProcessor, StateResult, WorkResult};
use crate::state::AgentState;
use crate::tasks::{TaskStatus, Thought};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Handles the WORK state (and PLAY, which shares the pipeline).
pub struct WorkProcessor {
    deps: Arc<ProcessorDeps>,
    driver: BatchDriver,
    metrics: ProcessorMetrics,
}

impl WorkProcessor {
    /// Build over the shared deps.
    pub fn new(deps: Arc<ProcessorDeps>) -> Self {
        Self {
            driver: BatchDriver::new(deps.clone()),
            deps,
            metrics: ProcessorMetrics::default(),
        }
    }

    /// Phase 1: activate PENDING tasks up to the active-task cap.
    pub(crate) async fn activate_pending_tasks(&self) -> Result<u32> {
        let active = self
            .deps
            .store
            .count_tasks_by_status(TaskStatus::Active)
            .await?;
        let capacity = self.deps.limits.max_active_tasks.saturating_sub(active);
        if capacity == 0 {
            return Ok(0);
        }

        let pending = self.deps.store.tasks_by_status(TaskStatus::Pending).await?;
        let mut activated = 0;
        for task in pending.into_iter().take(capacity) {
            self.deps
                .store
                .update_task_status(&task.task_id, TaskStatus::Active)
                .await?;
            activated += 1;
        }
        Ok(activated)
    }

    /// Phase 2: seed a thought for each ACTIVE task that has none yet.
    pub(crate) async fn generate_seed_thoughts(&self, round_number: u32) -> Result<u32> {
        let active = self.deps.store.tasks_by_status(TaskStatus::Active).await?;
        let mut generated = 0;
        for task in active {
            if !self.deps.store.thoughts_for_task(&task.task_id).await?.is_empty() {
                continue;
            }
            let thought = Thought::seed(&task, round_number, self.deps.clock.now());
            self.deps.store.insert_thought(thought).await?;
            generated += 1;
        }
        Ok(generated)
    }

    /// Phases 3 and 4: queue pending thoughts and process a batch.
    pub(crate) async fn process_batch(&self, origin: &str, round_number: u32) -> BatchOutcome {
        self.driver.run_round(origin, round_number, None, |_| true).await
    }
}

#[async_trait]
impl StateProcessor for WorkProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Work, AgentState::Play]
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn process(&self, round_number: u32) -> Result<StateResult> {
        let started = self.deps.clock.now();
        let mut errors = 0;

        let tasks_activated = match self.activate_pending_tasks().await {
            Ok(count) => count,
            Err(activation_error) => {
                debug!(%activation_error, "task activation failed this round");
                errors += 1;
                0
            }
        };

        let generated = match self.generate_seed_thoughts(round_number).await {
            Ok(count) => count,
            Err(seed_error) => {
                debug!(%seed_error, "seed generation failed this round");
                errors += 1;
                0
            }
        };

        let batch = self.process_batch("work", round_number).await;
        errors += batch.errors;

        let duration = (self.deps.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        if batch.processed > 0 || tasks_activated > 0 {
            info!(
                round_number,
                tasks_activated,
                thoughts_generated = generated,
                thoughts_processed = batch.processed,
                "work round completed"
            );
        } else {
            debug!(round_number, "work round idle");
        }

        self.metrics.record_round(batch.processed, errors);
        Ok(StateResult::Work(WorkResult {
            tasks_activated,
            thoughts_processed: batch.processed,
            errors,
            duration_seconds: duration,
        }))
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
