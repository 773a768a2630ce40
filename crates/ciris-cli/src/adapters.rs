// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The bundled adapters: a stdout/stderr CLI transport, a console wise
//! authority, and a graph-backed audit sink. Real chat and HTTP
//! transports live outside the core and register the same way.

use async_trait::async_trait;
use ciris::errors::Result;
use ciris::graph::{AuditEntry, TypedNode};
use ciris::services::time::TimeSource;
use ciris::services::traits::{
    AuditService, CommunicationService, GuidanceRequest, MemoryService, WiseAuthorityService,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Terminal transport: outbound messages print to stdout; inbound
/// messages are whatever was queued with [`CliComms::push_inbound`].
pub struct CliComms {
    channel: String,
    inbound: Mutex<Vec<String>>,
}

impl CliComms {
    /// A transport whose home channel is `channel`.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            inbound: Mutex::new(Vec::new()),
        }
    }

    /// Queue a message for the next `fetch_messages` call.
    pub fn push_inbound(&self, message: impl Into<String>) {
        self.inbound.lock().push(message.into());
    }
}

#[async_trait]
impl CommunicationService for CliComms {
    async fn send_message(&self, channel: &str, content: &str) -> Result<()> {
        println!("[{channel}] {content}");
        Ok(())
    }

    async fn fetch_messages(&self, _channel: &str, limit: usize) -> Result<Vec<String>> {
        let inbound = self.inbound.lock();
        Ok(inbound.iter().rev().take(limit).rev().cloned().collect())
    }

    fn default_channel(&self) -> Option<String> {
        Some(self.channel.clone())
    }
}

/// Console wise authority: deferrals surface on stderr for the operator.
pub struct ConsoleWiseAuthority;

#[async_trait]
impl WiseAuthorityService for ConsoleWiseAuthority {
    async fn fetch_guidance(&self, request: &GuidanceRequest) -> Result<Option<String>> {
        eprintln!("[wise-authority] guidance requested: {}", request.question);
        Ok(None)
    }

    async fn send_deferral(&self, thought_id: &str, reason: &str) -> Result<()> {
        eprintln!("[wise-authority] deferral for {thought_id}: {reason}");
        Ok(())
    }
}

/// Audit sink that persists entries as graph memories.
pub struct GraphAudit {
    graph: Arc<dyn MemoryService>,
    clock: Arc<dyn TimeSource>,
}

impl GraphAudit {
    /// Build over the graph memory.
    pub fn new(graph: Arc<dyn MemoryService>, clock: Arc<dyn TimeSource>) -> Self {
        Self { graph, clock }
    }
}

#[async_trait]
impl AuditService for GraphAudit {
    async fn log_event(&self, event: &Value) -> Result<()> {
        let entry = AuditEntry {
            id: format!("audit_{}", Uuid::new_v4().simple()),
            action: event
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            actor: event
                .get("actor")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            correlation_id: event
                .get("correlation_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            timestamp: self.clock.now(),
            updated_by: "audit_service".to_string(),
        };
        self.graph.memorize(entry.to_graph_node()).await?;
        Ok(())
    }
}
