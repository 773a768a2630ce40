// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Solitude processor: reduced-activity reflection. Only critical tasks
//! are processed; the arrival of urgent work raises the exit hint so the
//! agent loop returns to WORK.

use crate::errors::Result;
use crate::processors::batch::{BatchDriver, ProcessorDeps};
use crate::processors::{
    MetricsSnapshot, ProcessorMetrics, SolitudeResult, StateProcessor, StateResult,
};
use crate::state::AgentState;
use crate::tasks::TaskStatus;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Tasks at or above this priority interrupt solitude.
pub const CRITICAL_PRIORITY: i32 = 8;

/// Handles the SOLITUDE state.
pub struct SolitudeProcessor {
    deps: Arc<ProcessorDeps>,
    driver: BatchDriver,
    metrics: ProcessorMetrics,
}

impl SolitudeProcessor {
    /// Build over the shared deps.
    pub fn new(deps: Arc<ProcessorDeps>) -> Self {
        Self {
            driver: BatchDriver::new(deps.clone()),
            deps,
            metrics: ProcessorMetrics::default(),
        }
    }

    async fn urgent_work_waiting(&self) -> Result<Option<String>> {
        for status in [TaskStatus::Pending, TaskStatus::Active] {
            if let Some(task) = self
                .deps
                .store
                .tasks_by_status(status)
                .await?
                .into_iter()
                .find(|task| task.priority >= CRITICAL_PRIORITY)
            {
                return Ok(Some(format!(
                    "critical task {} (priority {}) waiting",
                    task.task_id, task.priority
                )));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl StateProcessor for SolitudeProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Solitude]
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn process(&self, round_number: u32) -> Result<StateResult> {
        let started = self.deps.clock.now();

        // Only critical tasks are worked in solitude.
        let batch = self
            .driver
            .run_round("solitude", round_number, None, |task| {
                task.priority >= CRITICAL_PRIORITY
            })
            .await;

        let exit_reason = self.urgent_work_waiting().await?;
        let should_exit = exit_reason.is_some();
        if let Some(reason) = &exit_reason {
            info!(%reason, "solitude interrupted by urgent work");
        }

        self.metrics.record_round(batch.processed, batch.errors);
        let duration = (self.deps.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        Ok(StateResult::Solitude(SolitudeResult {
            thoughts_processed: batch.processed,
            errors: batch.errors,
            duration_seconds: duration,
            should_exit_solitude: should_exit,
            exit_reason,
        }))
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
