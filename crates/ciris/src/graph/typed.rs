// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed node conversion layer.
//!
//! A typed node knows how to flatten itself into the generic [`GraphNode`]
//! form (tagging `_node_class` in attributes) and how to rebuild itself,
//! tolerating missing optional fields. [`NodeTypeRegistry`] maps type tags
//! to decoders; decoding an unregistered tag yields the generic node back,
//! never an error.

use crate::config::ConfigNode;
use crate::correlations::CorrelationNode;
use crate::errors::Result;
use crate::graph::node::{node_type, GraphNode};
use crate::graph::records::{AuditEntry, IdentitySnapshot, TsdbSummary};
use crate::incidents::{IncidentNode, InsightNode, ProblemNode};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Attribute key carrying the typed class tag.
pub const NODE_CLASS_KEY: &str = "_node_class";

/// A node with a typed round-trip through the generic form.
pub trait TypedNode: Sized {
    /// Value written to the `_node_class` attribute.
    const NODE_CLASS: &'static str;

    /// Type tag of the generic form.
    const NODE_TYPE: &'static str;

    /// Flatten into the generic storage form.
    fn to_graph_node(&self) -> GraphNode;

    /// Rebuild from the generic form. Missing optional fields fall back to
    /// defaults; missing required fields are a decode error.
    fn from_graph_node(node: &GraphNode) -> Result<Self>;
}

/// Result of decoding a generic node through the registry.
#[derive(Debug, Clone)]
pub enum DecodedNode {
    /// Versioned configuration value
    Config(ConfigNode),
    /// Audit trail entry
    AuditEntry(AuditEntry),
    /// Captured incident
    Incident(IncidentNode),
    /// Mined root-cause problem
    Problem(ProblemNode),
    /// Dream-cycle insight
    Insight(InsightNode),
    /// Persisted correlation
    Correlation(CorrelationNode),
    /// Consolidated timeseries summary
    TsdbSummary(TsdbSummary),
    /// Identity drift snapshot
    IdentitySnapshot(IdentitySnapshot),
    /// No decoder registered for the tag; the generic node as stored
    Generic(GraphNode),
}

type Decoder = fn(&GraphNode) -> Option<DecodedNode>;

/// Maps node type tags to typed decoders.
pub struct NodeTypeRegistry {
    decoders: HashMap<String, Decoder>,
}

impl NodeTypeRegistry {
    /// An empty registry. Everything decodes to [`DecodedNode::Generic`].
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// A registry with every node type the core itself writes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(node_type::CONFIG, |node| {
            ConfigNode::from_graph_node(node).ok().map(DecodedNode::Config)
        });
        registry.register(node_type::AUDIT_ENTRY, |node| {
            AuditEntry::from_graph_node(node)
                .ok()
                .map(DecodedNode::AuditEntry)
        });
        registry.register(node_type::INCIDENT, |node| {
            IncidentNode::from_graph_node(node)
                .ok()
                .map(DecodedNode::Incident)
        });
        registry.register(node_type::PROBLEM, |node| {
            ProblemNode::from_graph_node(node)
                .ok()
                .map(DecodedNode::Problem)
        });
        registry.register(node_type::INSIGHT, |node| {
            InsightNode::from_graph_node(node)
                .ok()
                .map(DecodedNode::Insight)
        });
        registry.register(node_type::CORRELATION, |node| {
            CorrelationNode::from_graph_node(node)
                .ok()
                .map(DecodedNode::Correlation)
        });
        registry.register(node_type::TSDB_SUMMARY, |node| {
            TsdbSummary::from_graph_node(node)
                .ok()
                .map(DecodedNode::TsdbSummary)
        });
        registry.register(node_type::IDENTITY_SNAPSHOT, |node| {
            IdentitySnapshot::from_graph_node(node)
                .ok()
                .map(DecodedNode::IdentitySnapshot)
        });
        registry
    }

    /// Register (or replace) a decoder for a type tag.
    pub fn register(&mut self, node_type: &str, decoder: Decoder) {
        self.decoders.insert(node_type.to_string(), decoder);
    }

    /// Decode a generic node. Unregistered tags and decode failures both
    /// fall back to the generic form.
    pub fn decode(&self, node: GraphNode) -> DecodedNode {
        if let Some(decoder) = self.decoders.get(&node.node_type) {
            if let Some(decoded) = decoder(&node) {
                return decoded;
            }
        }
        DecodedNode::Generic(node)
    }
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Read an RFC-3339 datetime attribute.
pub(crate) fn attr_datetime(node: &GraphNode, key: &str) -> Option<DateTime<Utc>> {
    node.attr_str(key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Read a string-list attribute, skipping non-string entries.
pub(crate) fn attr_string_list(node: &GraphNode, key: &str) -> Vec<String> {
    node.attributes
        .get(key)
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::GraphScope;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_unregistered_tag_decodes_to_generic() {
        let registry = NodeTypeRegistry::with_builtins();
        let node = GraphNode::new("x1", "exotic_type", GraphScope::Local, "test", at())
            .with_attribute("payload", json!({"a": 1}));
        match registry.decode(node.clone()) {
            DecodedNode::Generic(generic) => assert_eq!(generic, node),
            other => panic!("expected generic, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_failure_falls_back_to_generic() {
        // A node tagged as config but missing required fields must not error.
        let registry = NodeTypeRegistry::with_builtins();
        let node = GraphNode::new("bad", node_type::CONFIG, GraphScope::Local, "test", at());
        assert!(matches!(registry.decode(node), DecodedNode::Generic(_)));
    }

    #[test]
    fn test_empty_registry_is_all_generic() {
        let registry = NodeTypeRegistry::new();
        let node = GraphNode::new("n", node_type::INCIDENT, GraphScope::Local, "test", at());
        assert!(matches!(registry.decode(node), DecodedNode::Generic(_)));
    }

    #[test]
    fn test_attr_datetime_parses_rfc3339() {
        let node = GraphNode::new("n", "concept", GraphScope::Local, "test", at())
            .with_attribute("detected_at", json!("2026-01-01T00:05:00+00:00"));
        let parsed = attr_datetime(&node, "detected_at").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap());
        assert!(attr_datetime(&node, "missing").is_none());
    }

    #[test]
    fn test_attr_string_list_skips_non_strings() {
        let node = GraphNode::new("n", "concept", GraphScope::Local, "test", at())
            .with_attribute("items", json!(["a", 2, "b"]));
        assert_eq!(attr_string_list(&node, "items"), vec!["a", "b"]);
        assert!(attr_string_list(&node, "missing").is_empty());
    }
}
