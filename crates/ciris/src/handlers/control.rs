// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Control-flow handlers: reflection, escalation, refusal, completion.

use super::HandlerDeps;
use crate::dispatch::{ActionHandler, DispatchContext};
use crate::dma::results::ActionSelectionResult;
use crate::errors::{Error, Result};
use crate::registry::ServiceHandle;
use crate::services::ServiceType;
use crate::tasks::{TaskStatus, Thought, ThoughtType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Completes the acting thought and spawns a deeper PONDER thought
/// carrying the reflection questions.
pub struct PonderHandler {
    deps: Arc<HandlerDeps>,
}

impl PonderHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for PonderHandler {
    fn name(&self) -> &'static str {
        "PonderHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<Option<String>> {
        let questions = result
            .parameters
            .get("questions")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|joined| !joined.is_empty())
            .unwrap_or_else(|| {
                result
                    .parameters
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("What is the right way to proceed?")
                    .to_string()
            });

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "ponder", "questions": questions}),
            )
            .await?;

        let ponder = Thought::child_of(
            thought,
            ThoughtType::Ponder,
            format!(
                "Reconsidering: {}\n\nReflection prompts:\n{questions}",
                thought.content
            ),
            context.round_number,
            self.deps.clock.now(),
        );
        let ponder_id = ponder.thought_id.clone();
        self.deps.store.insert_thought(ponder).await?;
        info!(
            thought_id = %thought.thought_id,
            %ponder_id,
            depth = thought.depth + 1,
            "spawned ponder thought"
        );
        Ok(Some(ponder_id))
    }
}

/// Escalates the task to a wise authority and defers the task.
pub struct DeferHandler {
    deps: Arc<HandlerDeps>,
}

impl DeferHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for DeferHandler {
    fn name(&self) -> &'static str {
        "DeferHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        let reason = result
            .parameters
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("deferred for human wisdom")
            .to_string();

        // Deferral delivery is best-effort; the DEFERRED task state is the
        // durable outcome.
        match self
            .deps
            .registry
            .get_service(self.name(), ServiceType::WiseAuthority, &[])
        {
            Some(provider) => {
                if let ServiceHandle::WiseAuthority(authority) = &provider.handle {
                    let sent = authority.send_deferral(&thought.thought_id, &reason).await;
                    self.deps.registry.report_outcome(&provider, sent.is_ok());
                    if let Err(error) = sent {
                        warn!(thought_id = %thought.thought_id, %error, "deferral delivery failed");
                    }
                }
            }
            None => {
                warn!(thought_id = %thought.thought_id, "no wise authority provider for deferral");
            }
        }

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "defer", "reason": reason}),
            )
            .await?;
        self.deps
            .store
            .update_task_status(&thought.source_task_id, TaskStatus::Deferred)
            .await?;
        Ok(None)
    }
}

/// Refuses the task and tells the channel why, best effort.
pub struct RejectHandler {
    deps: Arc<HandlerDeps>,
}

impl RejectHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for RejectHandler {
    fn name(&self) -> &'static str {
        "RejectHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<Option<String>> {
        let reason = result
            .parameters
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unable to proceed with this request")
            .to_string();

        if let Some(provider) = self
            .deps
            .registry
            .get_service(self.name(), ServiceType::Communication, &[])
        {
            if let ServiceHandle::Communication(comms) = &provider.handle {
                let sent = comms
                    .send_message(&context.channel_id, &format!("Unable to proceed: {reason}"))
                    .await;
                self.deps.registry.report_outcome(&provider, sent.is_ok());
                if let Err(error) = sent {
                    warn!(thought_id = %thought.thought_id, %error, "reject notice delivery failed");
                }
            }
        }

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "reject", "reason": reason}),
            )
            .await?;
        self.deps
            .store
            .update_task_status(&thought.source_task_id, TaskStatus::Failed)
            .await?;
        Ok(None)
    }
}

/// Marks the source task COMPLETED.
pub struct TaskCompleteHandler {
    deps: Arc<HandlerDeps>,
}

impl TaskCompleteHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for TaskCompleteHandler {
    fn name(&self) -> &'static str {
        "TaskCompleteHandler"
    }

    async fn handle(
        &self,
        _result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        self.deps
            .complete_thought(&thought.thought_id, json!({"action": "task_complete"}))
            .await?;

        let task = self
            .deps
            .store
            .get_task(&thought.source_task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {}", thought.source_task_id)))?;
        if task.status.is_terminal() {
            info!(
                task_id = %task.task_id,
                status = ?task.status,
                "task already finalised"
            );
            return Ok(None);
        }
        self.deps
            .store
            .update_task_status(&thought.source_task_id, TaskStatus::Completed)
            .await?;
        info!(task_id = %thought.source_task_id, "task completed");
        Ok(None)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::results::HandlerAction;
    use crate::persistence::{InMemoryStore, TaskStore};
    use crate::registry::{Priority, Provider, ServiceRegistry};
    use crate::services::time::{SystemClock, TimeSource};
    use crate::services::traits::{GuidanceRequest, WiseAuthorityService};
    use crate::tasks::{Task, ThoughtStatus};
    use chrono::Utc;
    use parking_lot::Mutex;

    struct RecordingAuthority {
        deferrals: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WiseAuthorityService for RecordingAuthority {
        async fn fetch_guidance(&self, _request: &GuidanceRequest) -> Result<Option<String>> {
            Ok(None)
        }

        async fn send_deferral(&self, thought_id: &str, reason: &str) -> Result<()> {
            self.deferrals
                .lock()
                .push((thought_id.to_string(), reason.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        deps: Arc<HandlerDeps>,
        store: Arc<InMemoryStore>,
        thought: Thought,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let registry = Arc::new(ServiceRegistry::new());
        let task = Task::new("t", "chan", "work", 0, Utc::now()).with_status(TaskStatus::Active);
        store.insert_task(task.clone()).await.unwrap();
        let mut thought = Thought::seed(&task, 1, Utc::now());
        thought.status = ThoughtStatus::Processing;
        store.insert_thought(thought.clone()).await.unwrap();
        Fixture {
            deps: HandlerDeps::new(store.clone(), registry, clock),
            store,
            thought,
        }
    }

    #[tokio::test]
    async fn test_ponder_spawns_deeper_thought() {
        let fixture = fixture().await;
        let handler = PonderHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(
            HandlerAction::Ponder,
            json!({"questions": ["Is this right?", "What is missing?"]}),
            "uncertain",
        );
        let context = DispatchContext::for_thought(&fixture.thought, "test", 2);

        let ponder_id = handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap()
            .unwrap();

        let ponder = fixture.store.get_thought(&ponder_id).await.unwrap().unwrap();
        assert_eq!(ponder.thought_type, ThoughtType::Ponder);
        assert_eq!(ponder.depth, 1);
        assert!(ponder.content.contains("Is this right?"));

        let original = fixture
            .store
            .get_thought(&fixture.thought.thought_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.status, ThoughtStatus::Completed);
    }

    #[tokio::test]
    async fn test_defer_sends_deferral_and_defers_task() {
        let fixture = fixture().await;
        let authority = Arc::new(RecordingAuthority {
            deferrals: Mutex::new(Vec::new()),
        });
        fixture.deps.registry.register_global(Provider::new(
            "authority",
            ServiceHandle::WiseAuthority(authority.clone()),
            Priority::Normal,
            [],
        ));

        let handler = DeferHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(
            HandlerAction::Defer,
            json!({"reason": "too uncertain"}),
            "escalate",
        );
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();

        let deferrals = authority.deferrals.lock();
        assert_eq!(deferrals.len(), 1);
        assert_eq!(deferrals[0].1, "too uncertain");
        drop(deferrals);

        let task = fixture.store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Deferred);
    }

    #[tokio::test]
    async fn test_defer_without_authority_still_defers_task() {
        let fixture = fixture().await;
        let handler = DeferHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(HandlerAction::Defer, json!({}), "escalate");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();
        let task = fixture.store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Deferred);
    }

    #[tokio::test]
    async fn test_reject_fails_task() {
        let fixture = fixture().await;
        let handler = RejectHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(
            HandlerAction::Reject,
            json!({"reason": "out of scope"}),
            "refuse",
        );
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();
        let task = fixture.store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_task_complete_completes_task_and_thought() {
        let fixture = fixture().await;
        let handler = TaskCompleteHandler::new(fixture.deps.clone());
        let selection =
            ActionSelectionResult::new(HandlerAction::TaskComplete, json!({}), "done");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();

        let task = fixture.store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let thought = fixture
            .store
            .get_thought(&fixture.thought.thought_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(thought.status, ThoughtStatus::Completed);
    }

    #[tokio::test]
    async fn test_task_complete_on_terminal_task_is_quiet() {
        let fixture = fixture().await;
        fixture
            .store
            .update_task_status("t", TaskStatus::Completed)
            .await
            .unwrap();
        let handler = TaskCompleteHandler::new(fixture.deps.clone());
        let selection =
            ActionSelectionResult::new(HandlerAction::TaskComplete, json!({}), "done");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();
        let task = fixture.store.get_task("t").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }
}
