// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Capability Traits
//!
//! Abstract traits for the external collaborators the core depends on.
//! Concrete adapters (chat, CLI, HTTP), LLM clients, and audit sinks live
//! outside the core; the core talks to them through these seams so tests
//! and the mock LLM can stand in for any of them.

use crate::errors::Result;
use crate::graph::{GraphNode, GraphScope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Role of a chat message sent to an LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction
    System,
    /// End-user or agent-originated content
    User,
    /// Prior assistant output
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: ChatRole,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Token accounting returned with every LLM call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens produced in the completion
    pub completion_tokens: u32,
    /// Model that served the request
    pub model: String,
}

/// Structured LLM completion capability.
///
/// The core only ever asks for schema-constrained output; free-form text
/// generation is not part of the contract.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Run a structured completion. `response_schema` is a JSON schema the
    /// provider must satisfy; the returned value validates against it.
    async fn call_structured(
        &self,
        messages: &[ChatMessage],
        response_schema: &Value,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<(Value, ResourceUsage)>;
}

/// Message transport capability.
#[async_trait]
pub trait CommunicationService: Send + Sync {
    /// Deliver `content` to `channel`.
    async fn send_message(&self, channel: &str, content: &str) -> Result<()>;

    /// Fetch up to `limit` recent messages from `channel`.
    async fn fetch_messages(&self, channel: &str, limit: usize) -> Result<Vec<String>>;

    /// The adapter's home channel, if it has one. The highest-priority
    /// adapter with a home channel becomes the agent's default channel.
    fn default_channel(&self) -> Option<String>;
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that ran
    pub tool_name: String,
    /// Whether the tool reported success
    pub success: bool,
    /// Tool output payload
    pub output: Value,
    /// Error description when `success` is false
    pub error: Option<String>,
}

/// External tool execution capability.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Execute a named tool with JSON parameters.
    async fn execute_tool(&self, name: &str, params: &Value) -> Result<ToolResult>;

    /// Names of the tools this adapter can run.
    async fn available_tools(&self) -> Vec<String>;

    /// Retrieve a prior tool result by its correlation id, waiting up to
    /// `timeout` for it to land.
    async fn tool_result(&self, correlation_id: &str, timeout: Duration) -> Result<ToolResult>;

    /// Check parameters against the tool's declared schema.
    async fn validate_parameters(&self, name: &str, params: &Value) -> Result<bool>;
}

/// A request for guidance from a human wise authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidanceRequest {
    /// What the agent is uncertain about
    pub question: String,
    /// Task the question arose from
    pub task_id: Option<String>,
    /// Free-form context for the reviewer
    pub context: Option<String>,
}

/// Human wisdom escalation capability.
#[async_trait]
pub trait WiseAuthorityService: Send + Sync {
    /// Ask for guidance; returns the authority's answer if one arrives.
    async fn fetch_guidance(&self, request: &GuidanceRequest) -> Result<Option<String>>;

    /// Hand a thought off to the authority with a reason.
    async fn send_deferral(&self, thought_id: &str, reason: &str) -> Result<()>;
}

/// Query against the graph memory.
///
/// `node_id` supports a trailing `*` wildcard for prefix recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Node id, exact or `prefix*`
    pub node_id: String,
    /// Restrict to a scope, or search all scopes
    pub scope: Option<GraphScope>,
}

impl MemoryQuery {
    /// Exact-id query in a scope.
    pub fn by_id(node_id: impl Into<String>, scope: GraphScope) -> Self {
        Self {
            node_id: node_id.into(),
            scope: Some(scope),
        }
    }

    /// Prefix query across scopes. The `*` is appended here.
    pub fn by_prefix(prefix: impl Into<String>) -> Self {
        Self {
            node_id: format!("{}*", prefix.into()),
            scope: None,
        }
    }
}

/// Graph memory capability. All durable agent state is a node behind this.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Persist a node, overwriting any node with the same `(id, scope)`.
    /// The store stamps `updated_at` and enforces `version >= 1`.
    async fn memorize(&self, node: GraphNode) -> Result<String>;

    /// Recall nodes matching the query.
    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>>;

    /// Free-text search. Supports `type:<node_type>` filters.
    async fn search(&self, query: &str) -> Result<Vec<GraphNode>>;

    /// Remove a node.
    async fn forget(&self, id: &str, scope: GraphScope) -> Result<()>;
}

/// Audit sink capability.
#[async_trait]
pub trait AuditService: Send + Sync {
    /// Record an audit event. Implementations must not fail the caller's
    /// action on sink errors; they log and continue.
    async fn log_event(&self, event: &Value) -> Result<()>;
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_builders() {
        let msg = ChatMessage::system("be helpful");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "be helpful");

        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, ChatRole::User);
    }

    #[test]
    fn test_chat_role_serde() {
        let json = serde_json::to_string(&ChatRole::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn test_memory_query_by_prefix_appends_wildcard() {
        let query = MemoryQuery::by_prefix("dream_schedule_");
        assert_eq!(query.node_id, "dream_schedule_*");
        assert!(query.scope.is_none());
    }

    #[test]
    fn test_memory_query_by_id() {
        let query = MemoryQuery::by_id("node1", GraphScope::Local);
        assert_eq!(query.node_id, "node1");
        assert_eq!(query.scope, Some(GraphScope::Local));
    }

    #[test]
    fn test_resource_usage_default() {
        let usage = ResourceUsage::default();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 0);
    }
}
