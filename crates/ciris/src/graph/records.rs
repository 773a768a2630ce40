// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed nodes with no owning service of their own: audit entries,
//! identity snapshots, and consolidated timeseries summaries.

use crate::errors::{Error, Result};
use crate::graph::node::{node_type, GraphNode, GraphScope};
use crate::graph::typed::{attr_datetime, attr_string_list, TypedNode, NODE_CLASS_KEY};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

/// One audit trail entry, persisted as a graph memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// Node id
    pub id: String,
    /// Action that was performed
    pub action: String,
    /// Who or what performed it
    pub actor: String,
    /// Correlation the action belongs to
    pub correlation_id: Option<String>,
    /// When the action happened
    pub timestamp: DateTime<Utc>,
    /// Writer of this record
    pub updated_by: String,
}

impl TypedNode for AuditEntry {
    const NODE_CLASS: &'static str = "AuditEntry";
    const NODE_TYPE: &'static str = node_type::AUDIT_ENTRY;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("action".into(), json!(self.action));
        attributes.insert("actor".into(), json!(self.actor));
        if let Some(correlation_id) = &self.correlation_id {
            attributes.insert("correlation_id".into(), json!(correlation_id));
        }
        attributes.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Local,
            attributes,
            version: 1,
            updated_by: self.updated_by.clone(),
            updated_at: self.timestamp,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let action = node
            .attr_str("action")
            .ok_or_else(|| Error::NodeDecode(format!("audit entry {} missing action", node.id)))?
            .to_string();
        let actor = node
            .attr_str("actor")
            .ok_or_else(|| Error::NodeDecode(format!("audit entry {} missing actor", node.id)))?
            .to_string();
        Ok(Self {
            id: node.id.clone(),
            action,
            actor,
            correlation_id: node.attr_str("correlation_id").map(str::to_string),
            timestamp: attr_datetime(node, "timestamp").unwrap_or(node.updated_at),
            updated_by: node.updated_by.clone(),
        })
    }
}

/// Snapshot of identity drift measured during a dream cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySnapshot {
    /// Node id
    pub id: String,
    /// Hash of the baseline identity
    pub baseline_hash: String,
    /// Hash of the current identity
    pub current_hash: String,
    /// Drift from baseline, 0-100
    pub drift_percentage: f64,
    /// Components that changed since baseline
    pub changed_components: Vec<String>,
    /// When the measurement was taken
    pub measured_at: DateTime<Utc>,
    /// Writer of this record
    pub updated_by: String,
}

impl TypedNode for IdentitySnapshot {
    const NODE_CLASS: &'static str = "IdentitySnapshot";
    const NODE_TYPE: &'static str = node_type::IDENTITY_SNAPSHOT;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("baseline_hash".into(), json!(self.baseline_hash));
        attributes.insert("current_hash".into(), json!(self.current_hash));
        attributes.insert("drift_percentage".into(), json!(self.drift_percentage));
        attributes.insert("changed_components".into(), json!(self.changed_components));
        attributes.insert("measured_at".into(), json!(self.measured_at.to_rfc3339()));
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Identity,
            attributes,
            version: 1,
            updated_by: self.updated_by.clone(),
            updated_at: self.measured_at,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let baseline_hash = node
            .attr_str("baseline_hash")
            .ok_or_else(|| Error::NodeDecode(format!("snapshot {} missing baseline_hash", node.id)))?
            .to_string();
        let current_hash = node
            .attr_str("current_hash")
            .ok_or_else(|| Error::NodeDecode(format!("snapshot {} missing current_hash", node.id)))?
            .to_string();
        Ok(Self {
            id: node.id.clone(),
            baseline_hash,
            current_hash,
            drift_percentage: node
                .attributes
                .get("drift_percentage")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            changed_components: attr_string_list(node, "changed_components"),
            measured_at: attr_datetime(node, "measured_at").unwrap_or(node.updated_at),
            updated_by: node.updated_by.clone(),
        })
    }
}

/// Consolidated metric summary written by the dream cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TsdbSummary {
    /// Node id
    pub id: String,
    /// Start of the summarised window
    pub window_start: DateTime<Utc>,
    /// End of the summarised window
    pub window_end: DateTime<Utc>,
    /// Metric name -> (count, sum) over the window
    pub metrics: Map<String, Value>,
    /// Raw correlations folded into this summary
    pub source_correlation_count: u64,
    /// Writer of this record
    pub updated_by: String,
    /// When the summary was written
    pub updated_at: DateTime<Utc>,
}

impl TypedNode for TsdbSummary {
    const NODE_CLASS: &'static str = "TsdbSummary";
    const NODE_TYPE: &'static str = node_type::TSDB_SUMMARY;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("window_start".into(), json!(self.window_start.to_rfc3339()));
        attributes.insert("window_end".into(), json!(self.window_end.to_rfc3339()));
        attributes.insert("metrics".into(), Value::Object(self.metrics.clone()));
        attributes.insert(
            "source_correlation_count".into(),
            json!(self.source_correlation_count),
        );
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Local,
            attributes,
            version: 1,
            updated_by: self.updated_by.clone(),
            updated_at: self.updated_at,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let window_start = attr_datetime(node, "window_start")
            .ok_or_else(|| Error::NodeDecode(format!("summary {} missing window_start", node.id)))?;
        let window_end = attr_datetime(node, "window_end")
            .ok_or_else(|| Error::NodeDecode(format!("summary {} missing window_end", node.id)))?;
        let metrics = node
            .attributes
            .get("metrics")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            id: node.id.clone(),
            window_start,
            window_end,
            metrics,
            source_correlation_count: node
                .attributes
                .get("source_correlation_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            updated_by: node.updated_by.clone(),
            updated_at: node.updated_at,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_audit_entry_roundtrip() {
        let entry = AuditEntry {
            id: "audit_1".into(),
            action: "speak".into(),
            actor: "SpeakHandler".into(),
            correlation_id: Some("corr_1".into()),
            timestamp: at(),
            updated_by: "audit_service".into(),
        };
        let node = entry.to_graph_node();
        assert_eq!(node.attr_str(NODE_CLASS_KEY), Some("AuditEntry"));
        let back = AuditEntry::from_graph_node(&node).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_audit_entry_missing_optional_field() {
        let entry = AuditEntry {
            id: "audit_2".into(),
            action: "defer".into(),
            actor: "DeferHandler".into(),
            correlation_id: None,
            timestamp: at(),
            updated_by: "audit_service".into(),
        };
        let back = AuditEntry::from_graph_node(&entry.to_graph_node()).unwrap();
        assert_eq!(back.correlation_id, None);
    }

    #[test]
    fn test_audit_entry_missing_required_field_errors() {
        let node = GraphNode::new("bad", node_type::AUDIT_ENTRY, GraphScope::Local, "t", at());
        assert!(AuditEntry::from_graph_node(&node).is_err());
    }

    #[test]
    fn test_identity_snapshot_roundtrip() {
        let snapshot = IdentitySnapshot {
            id: "snap_1".into(),
            baseline_hash: "abc".into(),
            current_hash: "abd".into(),
            drift_percentage: 2.5,
            changed_components: vec!["filter_config".into()],
            measured_at: at(),
            updated_by: "dream_processor".into(),
        };
        let node = snapshot.to_graph_node();
        assert_eq!(node.scope, GraphScope::Identity);
        let back = IdentitySnapshot::from_graph_node(&node).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_tsdb_summary_roundtrip() {
        let mut metrics = Map::new();
        metrics.insert("handler_invoked_total".into(), json!({"count": 12, "sum": 12.0}));
        let summary = TsdbSummary {
            id: "tsdb_1".into(),
            window_start: at(),
            window_end: at() + chrono::Duration::hours(6),
            metrics,
            source_correlation_count: 12,
            updated_by: "dream_processor".into(),
            updated_at: at(),
        };
        let back = TsdbSummary::from_graph_node(&summary.to_graph_node()).unwrap();
        assert_eq!(back, summary);
    }
}
