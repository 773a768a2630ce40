// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Per-thought pipeline driver: DMA fan-out, conscience review, and the
//! forced-fallback rules for DMA failures and runaway reflection.

use crate::conscience::ConscienceEngine;
use crate::context::{AgentIdentity, WorkflowLimits};
use crate::dma::results::{ActionSelectionResult, HandlerAction};
use crate::dma::{DmaContext, DmaOrchestrator, DmaOutcome};
use crate::tasks::{Task, Thought};
use serde_json::json;
use tracing::{debug, warn};

/// Drives one thought through DMA fan-out, conscience checks, and the
/// fallback rules. Always yields a selection; failure is expressed as a
/// forced PONDER or DEFER, never as an error.
pub struct ThoughtProcessor {
    dma: DmaOrchestrator,
    conscience: ConscienceEngine,
    identity: AgentIdentity,
    limits: WorkflowLimits,
}

impl ThoughtProcessor {
    /// Assemble the pipeline.
    pub fn new(
        dma: DmaOrchestrator,
        conscience: ConscienceEngine,
        identity: AgentIdentity,
        limits: WorkflowLimits,
    ) -> Self {
        Self {
            dma,
            conscience,
            identity,
            limits,
        }
    }

    fn dma_context(&self, task: &Task, thought: &Thought, round_number: u32) -> DmaContext {
        DmaContext {
            agent_name: self.identity.name.clone(),
            agent_role: self.identity.role.clone(),
            domain: self.identity.domain.clone(),
            task_description: task.description.clone(),
            channel_id: thought.context.channel_id.clone(),
            round_number,
        }
    }

    fn forced_fallback(&self, thought: &Thought, stage: &str, reason: &str) -> ActionSelectionResult {
        // One forced PONDER per depth level; deep enough means the retry
        // loop is not converging and a human should see it.
        if thought.depth >= self.limits.dma_defer_depth {
            warn!(
                thought_id = %thought.thought_id,
                depth = thought.depth,
                stage,
                "repeated DMA failure, forcing DEFER"
            );
            ActionSelectionResult::new(
                HandlerAction::Defer,
                json!({
                    "reason": format!("DMA failure in {stage} persisted through reflection: {reason}"),
                }),
                "forced defer after repeated DMA failure",
            )
        } else {
            warn!(
                thought_id = %thought.thought_id,
                depth = thought.depth,
                stage,
                "DMA failure, forcing PONDER"
            );
            ActionSelectionResult::new(
                HandlerAction::Ponder,
                json!({
                    "reason": format!("DMA failure in {stage}: {reason}"),
                    "questions": ["What went wrong in evaluation?", "Can the thought be simplified?"],
                }),
                "forced ponder after DMA failure",
            )
        }
    }

    fn escalate_runaway_ponder(
        &self,
        thought: &Thought,
        selection: ActionSelectionResult,
    ) -> ActionSelectionResult {
        if selection.action == HandlerAction::Ponder && thought.depth >= self.limits.max_ponder_depth
        {
            warn!(
                thought_id = %thought.thought_id,
                depth = thought.depth,
                max = self.limits.max_ponder_depth,
                "ponder depth exhausted, forcing DEFER"
            );
            let mut deferred = ActionSelectionResult::new(
                HandlerAction::Defer,
                json!({
                    "reason": format!(
                        "reflection did not converge after {} levels",
                        thought.depth
                    ),
                    "original_parameters": selection.parameters,
                }),
                "forced defer after ponder depth exhausted",
            );
            deferred.conscience = selection.conscience;
            deferred
        } else {
            selection
        }
    }

    /// Run the full pipeline for one thought.
    pub async fn process(
        &self,
        thought: &Thought,
        task: &Task,
        round_number: u32,
    ) -> ActionSelectionResult {
        let context = self.dma_context(task, thought, round_number);

        let selection = match self.dma.run(thought, &context).await {
            DmaOutcome::Selected(selection) => selection,
            DmaOutcome::Failure { stage, reason } => {
                // Forced fallbacks skip the conscience; they are already
                // the conservative path.
                return self.forced_fallback(thought, stage.as_str(), &reason);
            }
        };

        debug!(
            thought_id = %thought.thought_id,
            action = selection.action.as_str(),
            "action selected"
        );

        let outcome = self.conscience.review(selection, thought).await;
        self.escalate_runaway_ponder(thought, outcome.final_action)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::conscience::ConscienceConfig;
    use crate::dma::results::{
        CsDmaResult, DsDmaResult, EthicalDecision, EthicalDmaResult,
    };
    use crate::dma::{
        ActionSelectionDma, CommonSenseDma, DmaInputs, DomainDma, EthicalDma,
    };
    use crate::errors::{Error, Result};
    use crate::registry::ServiceRegistry;
    use crate::tasks::{TaskStatus, ThoughtType};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    struct OkEthical;
    #[async_trait]
    impl EthicalDma for OkEthical {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> Result<EthicalDmaResult> {
            Ok(EthicalDmaResult {
                alignment: Default::default(),
                decision: EthicalDecision::Proceed,
                reasoning: String::new(),
            })
        }
    }

    struct BadEthical;
    #[async_trait]
    impl EthicalDma for BadEthical {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> Result<EthicalDmaResult> {
            Err(Error::Llm("down".into()))
        }
    }

    struct OkCs;
    #[async_trait]
    impl CommonSenseDma for OkCs {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> Result<CsDmaResult> {
            Ok(CsDmaResult {
                plausibility: 0.9,
                flags: vec![],
                reasoning: String::new(),
            })
        }
    }

    struct OkDs;
    #[async_trait]
    impl DomainDma for OkDs {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> Result<DsDmaResult> {
            Ok(DsDmaResult {
                domain: "general".into(),
                alignment: 0.9,
                flags: vec![],
                reasoning: String::new(),
            })
        }
    }

    struct FixedSelector(HandlerAction);
    #[async_trait]
    impl ActionSelectionDma for FixedSelector {
        async fn select(
            &self,
            thought: &Thought,
            _: &DmaContext,
            _: &DmaInputs,
        ) -> Result<ActionSelectionResult> {
            Ok(ActionSelectionResult::new(
                self.0,
                json!({"content": thought.content, "questions": ["?"]}),
                "fixed",
            ))
        }
    }

    fn processor(ethical: Arc<dyn EthicalDma>, selector: HandlerAction) -> ThoughtProcessor {
        let dma = DmaOrchestrator::new(
            ethical,
            Arc::new(OkCs),
            Arc::new(OkDs),
            Arc::new(FixedSelector(selector)),
            Duration::from_secs(5),
        );
        // No LLM registered: conscience checks pass through.
        let conscience =
            ConscienceEngine::new(Arc::new(ServiceRegistry::new()), ConscienceConfig::default());
        ThoughtProcessor::new(
            dma,
            conscience,
            AgentIdentity::default(),
            WorkflowLimits::default(),
        )
    }

    fn task() -> Task {
        Task::new("t", "chan", "greet", 0, Utc::now()).with_status(TaskStatus::Active)
    }

    fn thought_at_depth(depth: u32) -> Thought {
        let task = task();
        let mut thought = Thought::seed(&task, 1, Utc::now());
        thought.depth = depth;
        thought
    }

    #[tokio::test]
    async fn test_happy_path_keeps_selection() {
        let processor = processor(Arc::new(OkEthical), HandlerAction::Speak);
        let selection = processor.process(&thought_at_depth(0), &task(), 1).await;
        assert_eq!(selection.action, HandlerAction::Speak);
    }

    #[tokio::test]
    async fn test_dma_failure_forces_ponder_at_shallow_depth() {
        let processor = processor(Arc::new(BadEthical), HandlerAction::Speak);
        let selection = processor.process(&thought_at_depth(0), &task(), 1).await;
        assert_eq!(selection.action, HandlerAction::Ponder);
        assert!(selection.parameters["reason"]
            .as_str()
            .unwrap()
            .contains("ethical"));

        let selection = processor.process(&thought_at_depth(1), &task(), 2).await;
        assert_eq!(selection.action, HandlerAction::Ponder);
    }

    #[tokio::test]
    async fn test_dma_failure_forces_defer_after_two_ponders() {
        let processor = processor(Arc::new(BadEthical), HandlerAction::Speak);
        // Depth 2 means two forced ponders already happened upstream.
        let selection = processor.process(&thought_at_depth(2), &task(), 3).await;
        assert_eq!(selection.action, HandlerAction::Defer);
    }

    #[tokio::test]
    async fn test_runaway_ponder_escalates_to_defer() {
        let processor = processor(Arc::new(OkEthical), HandlerAction::Ponder);
        let shallow = processor.process(&thought_at_depth(1), &task(), 1).await;
        assert_eq!(shallow.action, HandlerAction::Ponder);

        let deep = processor.process(&thought_at_depth(5), &task(), 1).await;
        assert_eq!(deep.action, HandlerAction::Defer);
        assert!(deep.parameters["reason"]
            .as_str()
            .unwrap()
            .contains("did not converge"));
    }

    #[tokio::test]
    async fn test_follow_up_thought_type_flows_through() {
        let processor = processor(Arc::new(OkEthical), HandlerAction::TaskComplete);
        let task = task();
        let seed = Thought::seed(&task, 1, Utc::now());
        let follow_up =
            Thought::child_of(&seed, ThoughtType::FollowUp, "you spoke", 2, Utc::now());
        let selection = processor.process(&follow_up, &task, 2).await;
        assert_eq!(selection.action, HandlerAction::TaskComplete);
    }
}
