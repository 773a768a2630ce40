// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Graph-memory handlers: memorize, recall, forget.

use super::HandlerDeps;
use crate::dispatch::{ActionHandler, DispatchContext};
use crate::dma::results::ActionSelectionResult;
use crate::errors::{Error, Result};
use crate::graph::{GraphNode, GraphScope};
use crate::registry::ServiceHandle;
use crate::services::traits::MemoryQuery;
use crate::services::ServiceType;
use crate::tasks::Thought;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn memory_provider(
    deps: &HandlerDeps,
    handler: &str,
) -> Result<(
    Arc<crate::registry::Provider>,
    Arc<dyn crate::services::traits::MemoryService>,
)> {
    let provider = deps
        .registry
        .get_service(handler, ServiceType::Memory, &[])
        .ok_or_else(|| Error::NoProvider("no memory provider".into()))?;
    let ServiceHandle::Memory(memory) = &provider.handle else {
        return Err(Error::NoProvider("provider is not a memory service".into()));
    };
    let memory = memory.clone();
    Ok((provider, memory))
}

/// Writes the selected node into graph memory.
pub struct MemorizeHandler {
    deps: Arc<HandlerDeps>,
}

impl MemorizeHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for MemorizeHandler {
    fn name(&self) -> &'static str {
        "MemorizeHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        let raw = result
            .parameters
            .get("node")
            .cloned()
            .ok_or_else(|| Error::Handler("memorize selection missing parameters.node".into()))?;
        let node: GraphNode = serde_json::from_value(raw)
            .map_err(|error| Error::Handler(format!("memorize node malformed: {error}")))?;

        let (provider, memory) = memory_provider(&self.deps, self.name())?;
        let stored = memory.memorize(node).await;
        self.deps.registry.report_outcome(&provider, stored.is_ok());
        let node_id = stored?;

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "memorize", "node_id": node_id}),
            )
            .await?;
        Ok(None)
    }
}

/// Reads nodes from graph memory and records them on the thought.
pub struct RecallHandler {
    deps: Arc<HandlerDeps>,
}

impl RecallHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for RecallHandler {
    fn name(&self) -> &'static str {
        "RecallHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        let query: MemoryQuery = serde_json::from_value(
            result
                .parameters
                .get("query")
                .cloned()
                .ok_or_else(|| Error::Handler("recall selection missing parameters.query".into()))?,
        )
        .map_err(|error| Error::Handler(format!("recall query malformed: {error}")))?;

        let (provider, memory) = memory_provider(&self.deps, self.name())?;
        let recalled = memory.recall(&query).await;
        self.deps
            .registry
            .report_outcome(&provider, recalled.is_ok());
        let nodes = recalled?;

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({
                    "action": "recall",
                    "node_count": nodes.len(),
                    "nodes": nodes,
                }),
            )
            .await?;
        Ok(None)
    }
}

/// Removes a node from graph memory.
pub struct ForgetHandler {
    deps: Arc<HandlerDeps>,
}

impl ForgetHandler {
    /// Build over shared deps.
    pub fn new(deps: Arc<HandlerDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl ActionHandler for ForgetHandler {
    fn name(&self) -> &'static str {
        "ForgetHandler"
    }

    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        _context: &DispatchContext,
    ) -> Result<Option<String>> {
        let node_id = result
            .parameters
            .get("node_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Handler("forget selection missing parameters.node_id".into()))?
            .to_string();
        let scope: GraphScope = result
            .parameters
            .get("scope")
            .cloned()
            .map_or(Ok(GraphScope::Local), serde_json::from_value)
            .map_err(|error| Error::Handler(format!("forget scope malformed: {error}")))?;

        let (provider, memory) = memory_provider(&self.deps, self.name())?;
        let forgotten = memory.forget(&node_id, scope).await;
        self.deps
            .registry
            .report_outcome(&provider, forgotten.is_ok());
        forgotten?;

        self.deps
            .complete_thought(
                &thought.thought_id,
                json!({"action": "forget", "node_id": node_id}),
            )
            .await?;
        Ok(None)
    }
}
