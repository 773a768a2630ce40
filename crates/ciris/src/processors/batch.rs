// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shared batch driver: pulls PENDING thoughts for ACTIVE tasks, marks
//! them PROCESSING, and drives each through the pipeline and dispatch
//! concurrently. Every processed thought gets a TRACE_SPAN correlation
//! opened at start and closed at end; failures close it too, never
//! leaving it PENDING. Errors in one thought never affect its siblings.

use crate::correlations::{
    Correlation, CorrelationStatus, CorrelationStore, ResponseData,
};
use crate::dispatch::{ActionDispatcher, DispatchContext};
use crate::dma::results::ActionSelectionResult;
use crate::persistence::TaskStore;
use crate::processors::thought::ThoughtProcessor;
use crate::registry::ServiceRegistry;
use crate::services::time::TimeSource;
use crate::tasks::{Task, TaskStatus, Thought, ThoughtStatus};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// Dependency bundle shared by the state processors.
pub struct ProcessorDeps {
    /// Task/thought storage
    pub store: Arc<dyn TaskStore>,
    /// Correlation log
    pub correlations: Arc<dyn CorrelationStore>,
    /// Capability lookup
    pub registry: Arc<ServiceRegistry>,
    /// Action dispatch
    pub dispatcher: Arc<ActionDispatcher>,
    /// Per-thought pipeline
    pub thoughts: Arc<ThoughtProcessor>,
    /// Timestamp source
    pub clock: Arc<dyn TimeSource>,
    /// Processing limits
    pub limits: crate::context::WorkflowLimits,
}

/// Per-state gate on what a thought may select. Returning a reason
/// rejects the selection: the thought and its task are marked FAILED.
pub trait ActionGuard: Send + Sync {
    /// `Some(reason)` rejects the selection.
    fn check(&self, thought: &Thought, selection: &ActionSelectionResult) -> Option<String>;
}

/// Tallies from one batch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Thoughts that completed the pipeline (including rejected ones)
    pub processed: u32,
    /// Thoughts that failed or were rejected
    pub errors: u32,
}

/// Drives batches of thoughts through the pipeline.
pub struct BatchDriver {
    deps: Arc<ProcessorDeps>,
}

impl BatchDriver {
    /// Build over the shared deps.
    pub fn new(deps: Arc<ProcessorDeps>) -> Self {
        Self { deps }
    }

    /// Pull up to `max_active_thoughts` pending thoughts whose task passes
    /// `task_filter`, and process them in concurrent batches.
    pub async fn run_round<F>(
        &self,
        origin: &str,
        round_number: u32,
        guard: Option<&dyn ActionGuard>,
        task_filter: F,
    ) -> BatchOutcome
    where
        F: Fn(&Task) -> bool,
    {
        let pending = match self
            .deps
            .store
            .pending_thoughts_for_active_tasks(self.deps.limits.max_active_thoughts)
            .await
        {
            Ok(pending) => pending,
            Err(store_error) => {
                error!(%store_error, "failed to fetch pending thoughts");
                return BatchOutcome {
                    processed: 0,
                    errors: 1,
                };
            }
        };

        // Resolve tasks up front; thoughts with a missing task are failed
        // rather than silently skipped.
        let mut queue: Vec<(Thought, Task)> = Vec::new();
        let mut outcome = BatchOutcome::default();
        for thought in pending {
            match self.deps.store.get_task(&thought.source_task_id).await {
                Ok(Some(task)) if task_filter(&task) => queue.push((thought, task)),
                Ok(Some(_)) => {}
                Ok(None) => {
                    outcome.errors += 1;
                    self.fail_thought(&thought.thought_id, "source task missing".to_string())
                        .await;
                }
                Err(store_error) => {
                    outcome.errors += 1;
                    error!(thought_id = %thought.thought_id, %store_error, "task lookup failed");
                }
            }
        }

        for chunk in queue.chunks(self.deps.limits.batch_size) {
            let mut claimed = Vec::with_capacity(chunk.len());
            for (thought, task) in chunk {
                match self
                    .deps
                    .store
                    .update_thought_status(&thought.thought_id, ThoughtStatus::Processing, None)
                    .await
                {
                    Ok(()) => claimed.push((thought.clone(), task.clone())),
                    Err(store_error) => {
                        outcome.errors += 1;
                        error!(
                            thought_id = %thought.thought_id,
                            %store_error,
                            "failed to claim thought"
                        );
                    }
                }
            }

            let futures = claimed.iter().map(|(thought, task)| {
                self.process_one(thought, task, origin, round_number, guard)
            });
            for ok in futures::future::join_all(futures).await {
                outcome.processed += 1;
                if !ok {
                    outcome.errors += 1;
                }
            }
        }
        outcome
    }

    async fn fail_thought(&self, thought_id: &str, reason: String) {
        if let Err(store_error) = self
            .deps
            .store
            .update_thought_status(
                thought_id,
                ThoughtStatus::Failed,
                Some(json!({"error": reason})),
            )
            .await
        {
            error!(thought_id, %store_error, "failed to mark thought FAILED");
        }
    }

    /// Returns false when the thought errored or was rejected.
    async fn process_one(
        &self,
        thought: &Thought,
        task: &Task,
        origin: &str,
        round_number: u32,
        guard: Option<&dyn ActionGuard>,
    ) -> bool {
        let started = self.deps.clock.now();
        let correlation = Correlation::trace_span(
            &thought.source_task_id,
            &thought.thought_id,
            "process_thought",
            started,
        )
        .with_tag("processor_state", origin)
        .with_tag("thought_type", format!("{:?}", thought.thought_type));
        let correlation_id = correlation.correlation_id.clone();
        if let Err(store_error) = self.deps.correlations.add(correlation).await {
            error!(thought_id = %thought.thought_id, %store_error, "failed to open trace span");
        }

        let ok = self
            .drive(thought, task, origin, round_number, guard)
            .await;

        let elapsed_ms = (self.deps.clock.now() - started).num_milliseconds() as f64;
        let (response, status) = match &ok {
            Ok(summary) => (
                ResponseData::success(summary.clone(), elapsed_ms),
                CorrelationStatus::Completed,
            ),
            Err(reason) => (
                ResponseData::failure("ThoughtProcessing", reason.clone(), elapsed_ms),
                CorrelationStatus::Failed,
            ),
        };
        if let Err(store_error) = self
            .deps
            .correlations
            .update_response(&correlation_id, response, status)
            .await
        {
            error!(thought_id = %thought.thought_id, %store_error, "failed to close trace span");
        }

        ok.is_ok()
    }

    async fn drive(
        &self,
        thought: &Thought,
        task: &Task,
        origin: &str,
        round_number: u32,
        guard: Option<&dyn ActionGuard>,
    ) -> std::result::Result<String, String> {
        let selection = self.deps.thoughts.process(thought, task, round_number).await;

        if let Some(guard) = guard {
            if let Some(reason) = guard.check(thought, &selection) {
                warn!(
                    thought_id = %thought.thought_id,
                    action = selection.action.as_str(),
                    %reason,
                    "selection rejected by state guard"
                );
                self.fail_thought(&thought.thought_id, reason.clone()).await;
                if let Err(store_error) = self
                    .deps
                    .store
                    .update_task_status(&thought.source_task_id, TaskStatus::Failed)
                    .await
                {
                    error!(
                        task_id = %thought.source_task_id,
                        %store_error,
                        "failed to mark task FAILED after guard rejection"
                    );
                }
                return Err(reason);
            }
        }

        let context = DispatchContext::for_thought(thought, origin, round_number);
        match self.deps.dispatcher.dispatch(&selection, thought, &context).await {
            Ok(()) => Ok(selection.action.as_str().to_string()),
            Err(dispatch_error) => {
                self.fail_thought(&thought.thought_id, dispatch_error.to_string())
                    .await;
                Err(dispatch_error.to_string())
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::conscience::{ConscienceConfig, ConscienceEngine};
    use crate::context::{AgentIdentity, WorkflowLimits};
    use crate::correlations::CorrelationType;
    use crate::dma::results::{
        CsDmaResult, DsDmaResult, EthicalDecision, EthicalDmaResult, HandlerAction,
    };
    use crate::dma::{
        ActionSelectionDma, CommonSenseDma, DmaContext, DmaInputs, DmaOrchestrator, DomainDma,
        EthicalDma,
    };
    use crate::handlers::{default_handlers, HandlerDeps};
    use crate::persistence::InMemoryStore;
    use crate::services::time::SystemClock;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;

    struct OkEthical;
    #[async_trait]
    impl EthicalDma for OkEthical {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> crate::errors::Result<EthicalDmaResult> {
            Ok(EthicalDmaResult {
                alignment: Default::default(),
                decision: EthicalDecision::Proceed,
                reasoning: String::new(),
            })
        }
    }
    struct OkCs;
    #[async_trait]
    impl CommonSenseDma for OkCs {
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> crate::errors::Result<CsDmaResult> {
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
        async fn evaluate(&self, _: &Thought, _: &DmaContext) -> crate::errors::Result<DsDmaResult> {
            Ok(DsDmaResult {
                domain: "general".into(),
                alignment: 0.9,
                flags: vec![],
                reasoning: String::new(),
            })
        }
    }

    /// Always completes the task so the batch terminates in one pass.
    struct CompleteSelector;
    #[async_trait]
    impl ActionSelectionDma for CompleteSelector {
        async fn select(
            &self,
            _: &Thought,
            _: &DmaContext,
            _: &DmaInputs,
        ) -> crate::errors::Result<ActionSelectionResult> {
            Ok(ActionSelectionResult::new(
                HandlerAction::TaskComplete,
                json!({}),
                "done",
            ))
        }
    }

    struct DenySpeakGuard;
    impl ActionGuard for DenySpeakGuard {
        fn check(&self, _: &Thought, selection: &ActionSelectionResult) -> Option<String> {
            (selection.action == HandlerAction::TaskComplete)
                .then(|| "task_complete not allowed here".to_string())
        }
    }

    async fn deps() -> (Arc<ProcessorDeps>, Arc<InMemoryStore>) {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let registry = Arc::new(ServiceRegistry::new());
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
        let thoughts = Arc::new(ThoughtProcessor::new(
            DmaOrchestrator::new(
                Arc::new(OkEthical),
                Arc::new(OkCs),
                Arc::new(OkDs),
                Arc::new(CompleteSelector),
                Duration::from_secs(5),
            ),
            ConscienceEngine::new(Arc::new(ServiceRegistry::new()), ConscienceConfig::default()),
            AgentIdentity::default(),
            WorkflowLimits::default(),
        ));
        (
            Arc::new(ProcessorDeps {
                store: store.clone(),
                correlations: store.clone(),
                registry,
                dispatcher,
                thoughts,
                clock,
                limits: WorkflowLimits::default(),
            }),
            store,
        )
    }

    async fn seed_task(store: &InMemoryStore, id: &str) -> Thought {
        let task = Task::new(id, "chan", "work", 0, Utc::now()).with_status(TaskStatus::Active);
        store.insert_task(task.clone()).await.unwrap();
        let thought = Thought::seed(&task, 1, Utc::now());
        store.insert_thought(thought.clone()).await.unwrap();
        thought
    }

    #[tokio::test]
    async fn test_round_processes_all_pending_thoughts() {
        let (deps, store) = deps().await;
        seed_task(&store, "a").await;
        seed_task(&store, "b").await;

        let driver = BatchDriver::new(deps);
        let outcome = driver.run_round("work", 1, None, |_| true).await;
        assert_eq!(outcome.processed, 2);
        assert_eq!(outcome.errors, 0);

        // Tasks completed via the TaskComplete handler.
        assert_eq!(
            store.get_task("a").await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(
            store.get_task("b").await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_every_processed_thought_has_closed_trace_span() {
        let (deps, store) = deps().await;
        seed_task(&store, "a").await;
        seed_task(&store, "b").await;
        seed_task(&store, "c").await;

        BatchDriver::new(deps).run_round("work", 1, None, |_| true).await;

        let spans = store.by_type(CorrelationType::TraceSpan).await.unwrap();
        assert_eq!(spans.len(), 3);
        for span in spans {
            assert_eq!(span.status, CorrelationStatus::Completed);
            assert!(span.response.unwrap().success);
        }
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_guard_rejection_fails_thought_and_task() {
        let (deps, store) = deps().await;
        let thought = seed_task(&store, "a").await;

        let guard = DenySpeakGuard;
        let outcome = BatchDriver::new(deps)
            .run_round("wakeup", 1, Some(&guard), |_| true)
            .await;
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.errors, 1);

        let failed = store.get_thought(&thought.thought_id).await.unwrap().unwrap();
        assert_eq!(failed.status, ThoughtStatus::Failed);
        assert_eq!(
            store.get_task("a").await.unwrap().unwrap().status,
            TaskStatus::Failed
        );

        // The trace span closed as FAILED, not PENDING.
        let spans = store.by_type(CorrelationType::TraceSpan).await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, CorrelationStatus::Failed);
    }

    #[tokio::test]
    async fn test_task_filter_limits_scope() {
        let (deps, store) = deps().await;
        seed_task(&store, "keep").await;
        seed_task(&store, "skip").await;

        let outcome = BatchDriver::new(deps)
            .run_round("solitude", 1, None, |task| task.task_id == "keep")
            .await;
        assert_eq!(outcome.processed, 1);
        assert_eq!(
            store.get_task("skip").await.unwrap().unwrap().status,
            TaskStatus::Active
        );
    }
}
