// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # DMA Pipeline
//!
//! Four decision-making evaluators per thought: ethical, common-sense,
//! domain-specific, and action selection. The orchestrator fans the first
//! three out concurrently under a shared deadline, then feeds their
//! verdicts into action selection. Any evaluator failure becomes a
//! [`DmaOutcome::Failure`] for the enclosing processor to convert into a
//! forced PONDER or DEFER; exceptions are not control flow here.

pub mod llm;
pub mod results;

pub use llm::{LlmActionSelection, LlmCommonSenseDma, LlmDomainDma, LlmEthicalDma};
pub use results::{
    action_selection_schema, common_sense_schema, domain_schema, ethical_schema,
    ActionSelectionResult, CsDmaResult, DsDmaResult, EthicalDecision, EthicalDmaResult,
    HandlerAction,
};

use crate::errors::Result;
use crate::tasks::Thought;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Context shared by all evaluators for one thought.
#[derive(Debug, Clone, Default)]
pub struct DmaContext {
    /// Agent name from the profile
    pub agent_name: String,
    /// Agent role from the profile
    pub agent_role: String,
    /// Domain the domain-specific evaluator is configured for
    pub domain: String,
    /// Description of the source task
    pub task_description: String,
    /// Channel the eventual action targets
    pub channel_id: String,
    /// Current round
    pub round_number: u32,
}

/// Ethical evaluator seam.
#[async_trait]
pub trait EthicalDma: Send + Sync {
    /// Evaluate a thought against the agent's ethical frame.
    async fn evaluate(&self, thought: &Thought, context: &DmaContext) -> Result<EthicalDmaResult>;
}

/// Common-sense evaluator seam.
#[async_trait]
pub trait CommonSenseDma: Send + Sync {
    /// Evaluate a thought's plausibility.
    async fn evaluate(&self, thought: &Thought, context: &DmaContext) -> Result<CsDmaResult>;
}

/// Domain-specific evaluator seam, configured per agent profile.
#[async_trait]
pub trait DomainDma: Send + Sync {
    /// Evaluate a thought against the configured domain.
    async fn evaluate(&self, thought: &Thought, context: &DmaContext) -> Result<DsDmaResult>;
}

/// The three fan-out verdicts handed to action selection.
#[derive(Debug, Clone)]
pub struct DmaInputs {
    /// Ethical verdict
    pub ethical: EthicalDmaResult,
    /// Common-sense verdict
    pub common_sense: CsDmaResult,
    /// Domain verdict
    pub domain: DsDmaResult,
}

/// Action selection seam.
#[async_trait]
pub trait ActionSelectionDma: Send + Sync {
    /// Choose the thought's final action from the fan-out verdicts.
    async fn select(
        &self,
        thought: &Thought,
        context: &DmaContext,
        inputs: &DmaInputs,
    ) -> Result<ActionSelectionResult>;
}

/// Which pipeline stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStage {
    /// Ethical evaluator
    Ethical,
    /// Common-sense evaluator
    CommonSense,
    /// Domain evaluator
    Domain,
    /// Action selection
    ActionSelection,
}

impl DmaStage {
    /// Stage name for logs and correlations.
    pub fn as_str(&self) -> &'static str {
        match self {
            DmaStage::Ethical => "ethical",
            DmaStage::CommonSense => "common_sense",
            DmaStage::Domain => "domain",
            DmaStage::ActionSelection => "action_selection",
        }
    }
}

/// Sum-typed pipeline outcome; the processor branches on the variant.
#[derive(Debug, Clone)]
pub enum DmaOutcome {
    /// The pipeline selected an action
    Selected(ActionSelectionResult),
    /// An evaluator failed or timed out
    Failure {
        /// Stage that failed
        stage: DmaStage,
        /// Human-readable reason
        reason: String,
    },
}

/// Drives the four evaluators for one thought.
pub struct DmaOrchestrator {
    ethical: Arc<dyn EthicalDma>,
    common_sense: Arc<dyn CommonSenseDma>,
    domain: Arc<dyn DomainDma>,
    action_selection: Arc<dyn ActionSelectionDma>,
    deadline: Duration,
}

impl DmaOrchestrator {
    /// Assemble the pipeline with a shared per-stage deadline.
    pub fn new(
        ethical: Arc<dyn EthicalDma>,
        common_sense: Arc<dyn CommonSenseDma>,
        domain: Arc<dyn DomainDma>,
        action_selection: Arc<dyn ActionSelectionDma>,
        deadline: Duration,
    ) -> Self {
        Self {
            ethical,
            common_sense,
            domain,
            action_selection,
            deadline,
        }
    }

    /// Run the fan-out and action selection for one thought.
    pub async fn run(&self, thought: &Thought, context: &DmaContext) -> DmaOutcome {
        let (ethical, common_sense, domain) = tokio::join!(
            timeout(self.deadline, self.ethical.evaluate(thought, context)),
            timeout(self.deadline, self.common_sense.evaluate(thought, context)),
            timeout(self.deadline, self.domain.evaluate(thought, context)),
        );

        let ethical = match flatten(ethical) {
            Ok(result) => result,
            Err(reason) => return failure(DmaStage::Ethical, reason, thought),
        };
        let common_sense = match flatten(common_sense) {
            Ok(result) => result,
            Err(reason) => return failure(DmaStage::CommonSense, reason, thought),
        };
        let domain = match flatten(domain) {
            Ok(result) => result,
            Err(reason) => return failure(DmaStage::Domain, reason, thought),
        };

        let inputs = DmaInputs {
            ethical,
            common_sense,
            domain,
        };

        match timeout(
            self.deadline,
            self.action_selection.select(thought, context, &inputs),
        )
        .await
        {
            Ok(Ok(selection)) => DmaOutcome::Selected(selection),
            Ok(Err(error)) => failure(DmaStage::ActionSelection, error.to_string(), thought),
            Err(_) => failure(
                DmaStage::ActionSelection,
                format!("deadline of {:?} exceeded", self.deadline),
                thought,
            ),
        }
    }
}

fn flatten<T>(result: std::result::Result<Result<T>, tokio::time::error::Elapsed>)
    -> std::result::Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err("deadline exceeded".to_string()),
    }
}

fn failure(stage: DmaStage, reason: String, thought: &Thought) -> DmaOutcome {
    warn!(
        thought_id = %thought.thought_id,
        stage = stage.as_str(),
        %reason,
        "DMA failure"
    );
    DmaOutcome::Failure { stage, reason }
}
