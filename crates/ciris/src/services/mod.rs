// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Capability Services
//!
//! Narrow capability interfaces the cognitive core consumes from adapters.
//! Handlers request capabilities by [`ServiceType`] through the service
//! registry rather than holding concrete implementations.

pub mod time;
pub mod traits;

pub use time::{ManualClock, SystemClock, TimeSource};
pub use traits::{
    AuditService, ChatMessage, ChatRole, CommunicationService, GuidanceRequest, LlmService,
    MemoryQuery, MemoryService, ResourceUsage, ToolResult, ToolService, WiseAuthorityService,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The capability classes the core can look up in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Outbound/inbound message transport
    Communication,
    /// External tool execution
    Tool,
    /// Human wisdom escalation (guidance and deferrals)
    WiseAuthority,
    /// Structured LLM completion
    Llm,
    /// Graph memory (memorize/recall/search/forget)
    Memory,
    /// Audit event sink
    Audit,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceType::Communication => "communication",
            ServiceType::Tool => "tool",
            ServiceType::WiseAuthority => "wise_authority",
            ServiceType::Llm => "llm",
            ServiceType::Memory => "memory",
            ServiceType::Audit => "audit",
        };
        write!(f, "{name}")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_type_display() {
        assert_eq!(ServiceType::Communication.to_string(), "communication");
        assert_eq!(ServiceType::WiseAuthority.to_string(), "wise_authority");
        assert_eq!(ServiceType::Llm.to_string(), "llm");
    }

    #[test]
    fn test_service_type_serde_roundtrip() {
        let json = serde_json::to_string(&ServiceType::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
        let back: ServiceType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServiceType::Memory);
    }
}
