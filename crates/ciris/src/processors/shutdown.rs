// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shutdown processor: graceful shutdown negotiation. One shutdown task
//! and seed thought are created; pending non-shutdown thoughts are left
//! unprocessed. Negotiation ends when the shutdown task resolves or the
//! round cap is reached, after which a best-effort farewell goes to the
//! default channel.

use crate::errors::Result;
use crate::processors::batch::{BatchDriver, ProcessorDeps};
use crate::processors::{
    MetricsSnapshot, ProcessorMetrics, ShutdownResult, StateProcessor, StateResult,
};
use crate::state::AgentState;
use crate::tasks::{Task, TaskStatus, Thought};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Negotiation rounds before shutdown proceeds regardless.
pub const MAX_NEGOTIATION_ROUNDS: u32 = 3;

/// Handles the SHUTDOWN state.
pub struct ShutdownProcessor {
    deps: Arc<ProcessorDeps>,
    driver: BatchDriver,
    reason: Mutex<String>,
    task_id: Mutex<Option<String>>,
    rounds: AtomicU32,
    metrics: ProcessorMetrics,
}

impl ShutdownProcessor {
    /// Build over the shared deps.
    pub fn new(deps: Arc<ProcessorDeps>) -> Self {
        Self {
            driver: BatchDriver::new(deps.clone()),
            deps,
            reason: Mutex::new("shutdown requested".to_string()),
            task_id: Mutex::new(None),
            rounds: AtomicU32::new(0),
            metrics: ProcessorMetrics::default(),
        }
    }

    /// Record why the agent is shutting down; folded into the negotiation
    /// task description.
    pub fn set_reason(&self, reason: impl Into<String>) {
        *self.reason.lock() = reason.into();
    }

    async fn ensure_shutdown_task(&self, round_number: u32) -> Result<String> {
        if let Some(task_id) = self.task_id.lock().clone() {
            return Ok(task_id);
        }

        let channel = self
            .deps
            .registry
            .default_channel()
            .unwrap_or_else(|| "system".to_string());
        let reason = self.reason.lock().clone();
        let task = Task::new(
            format!("shutdown_{}", Uuid::new_v4().simple()),
            &channel,
            format!(
                "The agent is shutting down: {reason}. Say goodbye on the channel, \
                 then select task_complete when you are ready to stop."
            ),
            10,
            self.deps.clock.now(),
        )
        .with_status(TaskStatus::Active);
        let task_id = task.task_id.clone();
        info!(%task_id, %reason, "created shutdown negotiation task");

        self.deps.store.insert_task(task.clone()).await?;
        let thought = Thought::seed(&task, round_number, self.deps.clock.now());
        self.deps.store.insert_thought(thought).await?;

        *self.task_id.lock() = Some(task_id.clone());
        Ok(task_id)
    }

    async fn unprocessed_foreign_thoughts(&self, shutdown_task: &str) -> u32 {
        match self
            .deps
            .store
            .pending_thoughts_for_active_tasks(usize::MAX)
            .await
        {
            Ok(pending) => pending
                .iter()
                .filter(|thought| thought.source_task_id != shutdown_task)
                .count() as u32,
            Err(_) => 0,
        }
    }

    async fn send_farewell(&self) {
        let Some(comms) = self.deps.registry.communication("ShutdownProcessor") else {
            return;
        };
        let Some(channel) = self.deps.registry.default_channel() else {
            return;
        };
        let reason = self.reason.lock().clone();
        if let Err(send_error) = comms
            .send_message(&channel, &format!("Shutting down: {reason}. Goodbye."))
            .await
        {
            warn!(%send_error, "farewell delivery failed");
        }
    }
}

#[async_trait]
impl StateProcessor for ShutdownProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Shutdown]
    }

    async fn initialize(&self) -> Result<()> {
        self.rounds.store(0, Ordering::SeqCst);
        *self.task_id.lock() = None;
        Ok(())
    }

    async fn process(&self, round_number: u32) -> Result<StateResult> {
        let started = self.deps.clock.now();
        let negotiation_round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;

        let shutdown_task = self.ensure_shutdown_task(round_number).await?;
        let tasks_cleaned = self.unprocessed_foreign_thoughts(&shutdown_task).await;

        let batch = self
            .driver
            .run_round("shutdown", round_number, None, |task| {
                task.task_id == shutdown_task
            })
            .await;

        let task_status = self
            .deps
            .store
            .get_task(&shutdown_task)
            .await?
            .map(|task| task.status);
        let negotiated = matches!(
            task_status,
            Some(TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Deferred)
        );

        let capped = negotiation_round >= MAX_NEGOTIATION_ROUNDS;
        let shutdown_ready = negotiated || capped;
        if shutdown_ready {
            if capped && !negotiated {
                warn!(
                    negotiation_round,
                    "shutdown negotiation capped, proceeding"
                );
                self.send_farewell().await;
            }
            info!("shutdown negotiation complete");
        }

        self.metrics.record_round(batch.processed, batch.errors);
        let duration = (self.deps.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        Ok(StateResult::Shutdown(ShutdownResult {
            tasks_cleaned,
            shutdown_ready,
            errors: batch.errors,
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
