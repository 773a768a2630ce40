// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Play processor: the work pipeline at a slower, low-stakes cadence.
//! Task selection and limits match WORK; the agent loop applies a longer
//! inter-round delay, and results report under the PLAY tag.

use crate::errors::Result;
use crate::processors::batch::ProcessorDeps;
use crate::processors::work::WorkProcessor;
use crate::processors::{MetricsSnapshot, PlayResult, StateProcessor, StateResult};
use crate::services::time::TimeSource;
use crate::state::AgentState;
use async_trait::async_trait;
use std::sync::Arc;

/// Handles the PLAY state.
pub struct PlayProcessor {
    inner: WorkProcessor,
    clock: Arc<dyn TimeSource>,
}

impl PlayProcessor {
    /// Build over the shared deps.
    pub fn new(deps: Arc<ProcessorDeps>) -> Self {
        Self {
            clock: deps.clock.clone(),
            inner: WorkProcessor::new(deps),
        }
    }
}

#[async_trait]
impl StateProcessor for PlayProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Play]
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn process(&self, round_number: u32) -> Result<StateResult> {
        let started = self.clock.now();
        let mut errors = 0;
        if let Err(activation_error) = self.inner.activate_pending_tasks().await {
            tracing::debug!(%activation_error, "play task activation failed");
            errors += 1;
        }
        if let Err(seed_error) = self.inner.generate_seed_thoughts(round_number).await {
            tracing::debug!(%seed_error, "play seed generation failed");
            errors += 1;
        }
        let batch = self.inner.process_batch("play", round_number).await;
        let duration = (self.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        Ok(StateResult::Play(PlayResult {
            thoughts_processed: batch.processed,
            errors: errors + batch.errors,
            duration_seconds: duration,
        }))
    }

    async fn cleanup(&self) -> Result<()> {
        self.inner.cleanup().await
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics()
    }
}
