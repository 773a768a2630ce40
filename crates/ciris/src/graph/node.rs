// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Generic graph node form. Typed variants live next to the services that
//! own them and convert through [`crate::graph::typed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known node type tags.
///
/// The type field is an open string so stores can hold nodes the running
/// binary has no decoder for; these constants cover the types the core
/// itself writes.
pub mod node_type {
    /// Versioned configuration value
    pub const CONFIG: &str = "config";
    /// Audit trail entry
    pub const AUDIT_ENTRY: &str = "audit_entry";
    /// Captured WARNING/ERROR incident
    pub const INCIDENT: &str = "incident";
    /// Root-cause problem mined from incident patterns
    pub const PROBLEM: &str = "problem";
    /// Self-improvement insight from a dream cycle
    pub const INSIGHT: &str = "insight";
    /// Persisted service correlation
    pub const CORRELATION: &str = "correlation";
    /// Consolidated timeseries summary
    pub const TSDB_SUMMARY: &str = "tsdb_summary";
    /// Identity drift snapshot
    pub const IDENTITY_SNAPSHOT: &str = "identity_snapshot";
    /// Free-form concept (scheduled dreams, plans)
    pub const CONCEPT: &str = "concept";
}

/// Visibility scope of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphScope {
    /// Operational state of this agent instance
    Local,
    /// Part of the agent's durable identity
    Identity,
}

impl GraphScope {
    /// Stable string form used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphScope::Local => "local",
            GraphScope::Identity => "identity",
        }
    }
}

/// Attribute keys reserved for the node envelope. The store rejects
/// attributes maps that shadow these.
pub const RESERVED_ATTRIBUTE_KEYS: &[&str] =
    &["id", "type", "scope", "version", "updated_by", "updated_at"];

/// The generic, storage-facing node form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable identifier, unique within a scope
    pub id: String,
    /// Open type tag; see [`node_type`] for the tags the core writes
    #[serde(rename = "type")]
    pub node_type: String,
    /// Visibility scope
    pub scope: GraphScope,
    /// Extra fields beyond the envelope; typed variants round-trip here
    pub attributes: Map<String, Value>,
    /// Monotonic version, `>= 1`
    pub version: u32,
    /// Who wrote this version
    pub updated_by: String,
    /// When this version was written
    pub updated_at: DateTime<Utc>,
}

impl GraphNode {
    /// Build a version-1 node. The store re-stamps `updated_at` on write.
    pub fn new(
        id: impl Into<String>,
        node_type: impl Into<String>,
        scope: GraphScope,
        updated_by: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            scope,
            attributes: Map::new(),
            version: 1,
            updated_by: updated_by.into(),
            updated_at,
        }
    }

    /// Set one attribute, builder style.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Fetch a string attribute.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Fetch an i64 attribute.
    pub fn attr_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(Value::as_i64)
    }

    /// True when any attribute key collides with the reserved envelope keys.
    pub fn has_reserved_attribute(&self) -> Option<&'static str> {
        RESERVED_ATTRIBUTE_KEYS
            .iter()
            .find(|key| self.attributes.contains_key(**key))
            .copied()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_new_node_is_version_one() {
        let node = GraphNode::new("n1", node_type::CONCEPT, GraphScope::Local, "test", at());
        assert_eq!(node.version, 1);
        assert_eq!(node.node_type, "concept");
        assert!(node.attributes.is_empty());
    }

    #[test]
    fn test_with_attribute() {
        let node = GraphNode::new("n1", node_type::CONCEPT, GraphScope::Local, "test", at())
            .with_attribute("task_type", json!("scheduled_dream"))
            .with_attribute("duration_minutes", json!(30));
        assert_eq!(node.attr_str("task_type"), Some("scheduled_dream"));
        assert_eq!(node.attr_i64("duration_minutes"), Some(30));
        assert_eq!(node.attr_str("missing"), None);
    }

    #[test]
    fn test_reserved_attribute_detection() {
        let clean = GraphNode::new("n1", node_type::CONCEPT, GraphScope::Local, "test", at())
            .with_attribute("key", json!("v"));
        assert!(clean.has_reserved_attribute().is_none());

        let dirty = clean.with_attribute("version", json!(9));
        assert_eq!(dirty.has_reserved_attribute(), Some("version"));
    }

    #[test]
    fn test_scope_as_str() {
        assert_eq!(GraphScope::Local.as_str(), "local");
        assert_eq!(GraphScope::Identity.as_str(), "identity");
    }

    #[test]
    fn test_node_serde_roundtrip() {
        let node = GraphNode::new("n1", node_type::CONFIG, GraphScope::Local, "test", at())
            .with_attribute("key", json!("limits.max_active_tasks"));
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"type\":\"config\""));
        let back: GraphNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
