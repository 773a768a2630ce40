// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Handlers that touch the world outside the agent: speaking on a
//! channel, running tools, observing channel activity.

use super::HandlerDeps;
use crate::dispatch::{ActionHandler, DispatchContext};
use crate::dma::results::ActionSelectionResult;
use crate::errors::{Error, Result};
use crate::registry::ServiceHandle;
use crate::services::ServiceType;
use crate::tasks::{Thought, ThoughtType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Sends the selected utterance to the thought's channel and spawns a
/// follow-up thought asking whether the task is now complete.
pub struct SpeakHandler {
    deps: Arc<HandlerDeps>,
}

impl SpeakHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for SpeakHandler {
    fn name(&self) -> &'static str {
        "SpeakHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<Option<String>> {
        let content = result
            .speak_content()
            .ok_or_else(|| Error::Handler("speak selection missing parameters.content".into()))?
            .to_string();

        let provider = self
            .deps
            .registry
            .get_service(self.name(), ServiceType::Communication, &[])
            .ok_or_else(|| Error::NoProvider("no communication provider".into()))?;
        let ServiceHandle::Communication(comms) = &provider.handle else {
            return Err(Error::NoProvider("provider is not a communication service".into()));
        };

        let sent = comms.send_message(&context.channel_id, &content).await;
        self.deps
            .registry
            .report_outcome(&provider, sent.is_ok());
        sent?;

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "speak", "content": content}),
            )
            .await?;

        let follow_up = Thought::child_of(
            thought,
            ThoughtType::FollowUp,
            format!(
                "You spoke on channel {}: \"{content}\". If that completes the task, \
                 select task_complete; otherwise continue working on it.",
                context.channel_id
            ),
            context.round_number,
            self.deps.clock.now(),
        );
        let follow_up_id = follow_up.thought_id.clone();
        self.deps.store.insert_thought(follow_up).await?;
        Ok(Some(follow_up_id))
    }
}

/// Validates parameters, runs the named tool, and records its output on
/// the thought.
pub struct ToolHandler {
    deps: Arc<HandlerDeps>,
}

impl ToolHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for ToolHandler {
    fn name(&self) -> &'static str {
        "ToolHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        let tool_name = result
            .parameters
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Handler("tool selection missing parameters.name".into()))?
            .to_string();
        let tool_params = result
            .parameters
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let provider = self
            .deps
            .registry
            .get_service(self.name(), ServiceType::Tool, &[])
            .ok_or_else(|| Error::NoProvider("no tool provider".into()))?;
        let ServiceHandle::Tool(tools) = &provider.handle else {
            return Err(Error::NoProvider("provider is not a tool service".into()));
        };

        if !tools.validate_parameters(&tool_name, &tool_params).await? {
            return Err(Error::Handler(format!(
                "parameters rejected for tool {tool_name}"
            )));
        }

        let executed = tools.execute_tool(&tool_name, &tool_params).await;
        self.deps
            .registry
            .report_outcome(&provider, executed.is_ok());
        let tool_result = executed?;

        debug!(
            thought_id = %thought.thought_id,
            tool = tool_name,
            success = tool_result.success,
            "tool executed"
        );
        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "tool", "result": tool_result}),
            )
            .await?;
        Ok(None)
    }
}

/// Fetches recent channel messages and, when there are any, spawns a
/// follow-up thought carrying the observations.
pub struct ObserveHandler {
    deps: Arc<HandlerDeps>,
}

impl ObserveHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

const OBSERVE_FETCH_LIMIT: usize = 10;

#[async_trait]
impl ActionHandler for ObserveHandler {
    fn name(&self) -> &'static str {
        "ObserveHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<Option<String>> {
        let channel = result
            .parameters
            .get("channel_id")
            .and_then(Value::as_str)
            .unwrap_or(&context.channel_id)
            .to_string();

        let provider = self
            .deps
            .registry
            .get_service(self.name(), ServiceType::Communication, &[])
            .ok_or_else(|| Error::NoProvider("no communication provider".into()))?;
        let ServiceHandle::Communication(comms) = &provider.handle else {
            return Err(Error::NoProvider("provider is not a communication service".into()));
        };

        let fetched = comms.fetch_messages(&channel, OBSERVE_FETCH_LIMIT).await;
        self.deps
            .registry
            .report_outcome(&provider, fetched.is_ok());
        let messages = fetched?;

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "observe", "channel_id": channel, "message_count": messages.len()}),
            )
            .await?;

        if messages.is_empty() {
            return Ok(None);
        }

        let follow_up = Thought::child_of(
            thought,
            ThoughtType::FollowUp,
            format!(
                "Observed {} recent messages on {channel}:\n{}",
                messages.len(),
                messages.join("\n")
            ),
            context.round_number,
            self.deps.clock.now(),
        );
        let follow_up_id = follow_up.thought_id.clone();
        self.deps.store.insert_thought(follow_up).await?;
        Ok(Some(follow_up_id))
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
    use crate::services::traits::CommunicationService;
    use crate::tasks::{Task, TaskStatus, ThoughtStatus};
    use chrono::Utc;
    use parking_lot::Mutex;

    struct RecordingComms {
        sent: Mutex<Vec<(String, String)>>,
        canned: Vec<String>,
    }

    impl RecordingComms {
        fn new(canned: Vec<String>) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                canned,
            }
        }
    }

    #[async_trait]
    impl CommunicationService for RecordingComms {
        async fn send_message(&self, channel: &str, content: &str) -> Result<()> {
            self.sent
                .lock()
                .push((channel.to_string(), content.to_string()));
            Ok(())
        }

        async fn fetch_messages(&self, _channel: &str, limit: usize) -> Result<Vec<String>> {
            Ok(self.canned.iter().take(limit).cloned().collect())
        }

        fn default_channel(&self) -> Option<String> {
            Some("home".to_string())
        }
    }

    struct Fixture {
        deps: Arc<HandlerDeps>,
        store: Arc<InMemoryStore>,
        comms: Arc<RecordingComms>,
        thought: Thought,
    }

    async fn fixture(canned: Vec<String>) -> Fixture {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let registry = Arc::new(ServiceRegistry::new());
        let comms = Arc::new(RecordingComms::new(canned));
        registry.register_global(Provider::new(
            "test-comms",
            ServiceHandle::Communication(comms.clone()),
            Priority::Normal,
            [],
        ));

        let task = Task::new("t", "chan", "say hi", 0, Utc::now()).with_status(TaskStatus::Active);
        store.insert_task(task.clone()).await.unwrap();
        let mut thought = Thought::seed(&task, 1, Utc::now());
        thought.status = ThoughtStatus::Processing;
        store.insert_thought(thought.clone()).await.unwrap();

        Fixture {
            deps: HandlerDeps::new(store.clone(), registry, clock),
            store,
            comms,
            thought,
        }
    }

    #[tokio::test]
    async fn test_speak_sends_completes_and_spawns_follow_up() {
        let fixture = fixture(vec![]).await;
        let handler = SpeakHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(
            HandlerAction::Speak,
            json!({"content": "INTEGRITY - I agree."}),
            "affirmation",
        );
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);

        let follow_up = handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap()
            .unwrap();

        let sent = fixture.comms.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chan");
        assert_eq!(sent[0].1, "INTEGRITY - I agree.");
        drop(sent);

        let updated = fixture
            .store
            .get_thought(&fixture.thought.thought_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ThoughtStatus::Completed);

        let spawned = fixture.store.get_thought(&follow_up).await.unwrap().unwrap();
        assert_eq!(spawned.thought_type, ThoughtType::FollowUp);
        assert_eq!(spawned.depth, 1);
        assert!(spawned.content.contains("task_complete"));
    }

    #[tokio::test]
    async fn test_speak_without_content_fails() {
        let fixture = fixture(vec![]).await;
        let handler = SpeakHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(HandlerAction::Speak, json!({}), "broken");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        assert!(handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_speak_without_provider_is_no_provider() {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let registry = Arc::new(ServiceRegistry::new());
        let task = Task::new("t", "chan", "x", 0, Utc::now()).with_status(TaskStatus::Active);
        store.insert_task(task.clone()).await.unwrap();
        let thought = Thought::seed(&task, 1, Utc::now());
        store.insert_thought(thought.clone()).await.unwrap();

        let handler = SpeakHandler::new(HandlerDeps::new(store, registry, clock));
        let selection =
            ActionSelectionResult::new(HandlerAction::Speak, json!({"content": "hi"}), "x");
        let context = DispatchContext::for_thought(&thought, "test", 1);
        let error = handler
            .handle(&selection, &thought, &context)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoProvider(_)));
    }

    #[tokio::test]
    async fn test_observe_spawns_follow_up_with_messages() {
        let fixture = fixture(vec!["hello".into(), "again".into()]).await;
        let handler = ObserveHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(HandlerAction::Observe, json!({}), "look");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);

        let follow_up = handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap()
            .unwrap();
        let spawned = fixture.store.get_thought(&follow_up).await.unwrap().unwrap();
        assert!(spawned.content.contains("hello"));
        assert!(spawned.content.contains("again"));
    }

    #[tokio::test]
    async fn test_observe_empty_channel_no_follow_up() {
        let fixture = fixture(vec![]).await;
        let handler = ObserveHandler::new(fixture.deps.clone());
        let selection = ActionSelectionResult::new(HandlerAction::Observe, json!({}), "look");
        let context = DispatchContext::for_thought(&fixture.thought, "test", 1);
        let follow_up = handler
            .handle(&selection, &fixture.thought, &context)
            .await
            .unwrap();
        assert!(follow_up.is_none());
    }
}
