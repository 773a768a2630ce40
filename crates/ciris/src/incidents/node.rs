// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed nodes for the incident chain.

use crate::errors::{Error, Result};
use crate::graph::node::{node_type, GraphNode, GraphScope};
use crate::graph::typed::{attr_datetime, attr_string_list, TypedNode, NODE_CLASS_KEY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Incident severity, ITIL-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentSeverity {
    /// Informational
    Low,
    /// Minor degradation
    Medium,
    /// Significant degradation
    High,
    /// Service down, major impact
    Critical,
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    /// Captured, not yet analyzed
    Open,
    /// Picked up by an analysis pass
    Investigating,
    /// Fixed
    Resolved,
    /// Closed without action
    Closed,
    /// Linked to a recurring problem
    Recurring,
}

/// A captured WARNING/ERROR event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentNode {
    /// Node id
    pub id: String,
    /// Level the event was logged at (WARNING, ERROR, CRITICAL)
    pub incident_type: String,
    /// Mapped severity
    pub severity: IncidentSeverity,
    /// Lifecycle status
    pub status: IncidentStatus,
    /// The log message
    pub description: String,
    /// Component (log target) that emitted the event
    pub source_component: String,
    /// When the event was captured
    pub detected_at: DateTime<Utc>,
    /// Correlation active at capture time
    pub correlation_id: Option<String>,
    /// Task active at capture time
    pub task_id: Option<String>,
    /// Thought active at capture time
    pub thought_id: Option<String>,
    /// Handler active at capture time
    pub handler_name: Option<String>,
    /// Source file of the log site
    pub filename: Option<String>,
    /// Source line of the log site
    pub line_number: Option<u32>,
    /// Error class for exception events
    pub exception_type: Option<String>,
    /// Backtrace for exception events
    pub stack_trace: Option<String>,
    /// Problem this incident recurs under
    pub problem_id: Option<String>,
    /// Writer of this record
    pub updated_by: String,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl TypedNode for IncidentNode {
    const NODE_CLASS: &'static str = "IncidentNode";
    const NODE_TYPE: &'static str = node_type::INCIDENT;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("incident_type".into(), json!(self.incident_type));
        attributes.insert("severity".into(), json!(self.severity));
        attributes.insert("status".into(), json!(self.status));
        attributes.insert("description".into(), json!(self.description));
        attributes.insert("source_component".into(), json!(self.source_component));
        attributes.insert("detected_at".into(), json!(self.detected_at.to_rfc3339()));
        for (key, value) in [
            ("correlation_id", &self.correlation_id),
            ("task_id", &self.task_id),
            ("thought_id", &self.thought_id),
            ("handler_name", &self.handler_name),
            ("filename", &self.filename),
            ("exception_type", &self.exception_type),
            ("stack_trace", &self.stack_trace),
            ("problem_id", &self.problem_id),
        ] {
            if let Some(value) = value {
                attributes.insert(key.into(), json!(value));
            }
        }
        if let Some(line_number) = self.line_number {
            attributes.insert("line_number".into(), json!(line_number));
        }
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
        let description = node
            .attr_str("description")
            .ok_or_else(|| Error::NodeDecode(format!("incident {} missing description", node.id)))?
            .to_string();
        let detected_at = attr_datetime(node, "detected_at")
            .ok_or_else(|| Error::NodeDecode(format!("incident {} missing detected_at", node.id)))?;
        let severity: IncidentSeverity = node
            .attributes
            .get("severity")
            .cloned()
            .map_or(Ok(IncidentSeverity::Medium), serde_json::from_value)
            .map_err(|error| Error::NodeDecode(format!("incident {}: {error}", node.id)))?;
        let status: IncidentStatus = node
            .attributes
            .get("status")
            .cloned()
            .map_or(Ok(IncidentStatus::Open), serde_json::from_value)
            .map_err(|error| Error::NodeDecode(format!("incident {}: {error}", node.id)))?;

        Ok(Self {
            id: node.id.clone(),
            incident_type: node
                .attr_str("incident_type")
                .unwrap_or("ERROR")
                .to_string(),
            severity,
            status,
            description,
            source_component: node
                .attr_str("source_component")
                .unwrap_or("unknown")
                .to_string(),
            detected_at,
            correlation_id: node.attr_str("correlation_id").map(str::to_string),
            task_id: node.attr_str("task_id").map(str::to_string),
            thought_id: node.attr_str("thought_id").map(str::to_string),
            handler_name: node.attr_str("handler_name").map(str::to_string),
            filename: node.attr_str("filename").map(str::to_string),
            line_number: node
                .attr_i64("line_number")
                .and_then(|line| u32::try_from(line).ok()),
            exception_type: node.attr_str("exception_type").map(str::to_string),
            stack_trace: node.attr_str("stack_trace").map(str::to_string),
            problem_id: node.attr_str("problem_id").map(str::to_string),
            updated_by: node.updated_by.clone(),
            updated_at: node.updated_at,
        })
    }
}

/// A root-cause problem mined from an incident pattern. Identity-scoped:
/// knowing its own failure modes is part of who the agent is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemNode {
    /// Node id
    pub id: String,
    /// Human-readable problem statement
    pub problem_statement: String,
    /// Incident ids linked to this problem
    pub affected_incidents: Vec<String>,
    /// Problem status
    pub status: String,
    /// Heuristic root causes
    pub potential_root_causes: Vec<String>,
    /// Suggested fixes
    pub recommended_actions: Vec<String>,
    /// Number of linked incidents
    pub incident_count: u32,
    /// Earliest linked incident
    pub first_occurrence: DateTime<Utc>,
    /// Latest linked incident
    pub last_occurrence: DateTime<Utc>,
    /// Writer of this record
    pub updated_by: String,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl TypedNode for ProblemNode {
    const NODE_CLASS: &'static str = "ProblemNode";
    const NODE_TYPE: &'static str = node_type::PROBLEM;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("problem_statement".into(), json!(self.problem_statement));
        attributes.insert("affected_incidents".into(), json!(self.affected_incidents));
        attributes.insert("status".into(), json!(self.status));
        attributes.insert(
            "potential_root_causes".into(),
            json!(self.potential_root_causes),
        );
        attributes.insert("recommended_actions".into(), json!(self.recommended_actions));
        attributes.insert("incident_count".into(), json!(self.incident_count));
        attributes.insert(
            "first_occurrence".into(),
            json!(self.first_occurrence.to_rfc3339()),
        );
        attributes.insert(
            "last_occurrence".into(),
            json!(self.last_occurrence.to_rfc3339()),
        );
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Identity,
            attributes,
            version: 1,
            updated_by: self.updated_by.clone(),
            updated_at: self.updated_at,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let problem_statement = node
            .attr_str("problem_statement")
            .ok_or_else(|| Error::NodeDecode(format!("problem {} missing statement", node.id)))?
            .to_string();
        let first_occurrence = attr_datetime(node, "first_occurrence").ok_or_else(|| {
            Error::NodeDecode(format!("problem {} missing first_occurrence", node.id))
        })?;
        let last_occurrence = attr_datetime(node, "last_occurrence").ok_or_else(|| {
            Error::NodeDecode(format!("problem {} missing last_occurrence", node.id))
        })?;
        Ok(Self {
            id: node.id.clone(),
            problem_statement,
            affected_incidents: attr_string_list(node, "affected_incidents"),
            status: node
                .attr_str("status")
                .unwrap_or("UNDER_INVESTIGATION")
                .to_string(),
            potential_root_causes: attr_string_list(node, "potential_root_causes"),
            recommended_actions: attr_string_list(node, "recommended_actions"),
            incident_count: node
                .attr_i64("incident_count")
                .and_then(|count| u32::try_from(count).ok())
                .unwrap_or(0),
            first_occurrence,
            last_occurrence,
            updated_by: node.updated_by.clone(),
            updated_at: node.updated_at,
        })
    }
}

/// An analysis summary produced at the end of each dream analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightNode {
    /// Node id
    pub id: String,
    /// Kind of analysis (PERIODIC_ANALYSIS, NO_INCIDENTS)
    pub insight_type: String,
    /// One-line summary
    pub summary: String,
    /// Counts and breakdowns
    pub details: Map<String, Value>,
    /// Recommended behaviour changes
    pub behavioral_adjustments: Vec<String>,
    /// Recommended configuration changes
    pub configuration_adjustments: Vec<String>,
    /// Incidents that fed the analysis
    pub source_incidents: Vec<String>,
    /// Problems identified by the analysis
    pub source_problems: Vec<String>,
    /// When the analysis ran
    pub analysis_timestamp: DateTime<Utc>,
    /// Writer of this record
    pub updated_by: String,
}

impl TypedNode for InsightNode {
    const NODE_CLASS: &'static str = "InsightNode";
    const NODE_TYPE: &'static str = node_type::INSIGHT;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("insight_type".into(), json!(self.insight_type));
        attributes.insert("summary".into(), json!(self.summary));
        attributes.insert("details".into(), Value::Object(self.details.clone()));
        attributes.insert(
            "behavioral_adjustments".into(),
            json!(self.behavioral_adjustments),
        );
        attributes.insert(
            "configuration_adjustments".into(),
            json!(self.configuration_adjustments),
        );
        attributes.insert("source_incidents".into(), json!(self.source_incidents));
        attributes.insert("source_problems".into(), json!(self.source_problems));
        attributes.insert(
            "analysis_timestamp".into(),
            json!(self.analysis_timestamp.to_rfc3339()),
        );
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Local,
            attributes,
            version: 1,
            updated_by: self.updated_by.clone(),
            updated_at: self.analysis_timestamp,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let summary = node
            .attr_str("summary")
            .ok_or_else(|| Error::NodeDecode(format!("insight {} missing summary", node.id)))?
            .to_string();
        let analysis_timestamp = attr_datetime(node, "analysis_timestamp").ok_or_else(|| {
            Error::NodeDecode(format!("insight {} missing analysis_timestamp", node.id))
        })?;
        Ok(Self {
            id: node.id.clone(),
            insight_type: node
                .attr_str("insight_type")
                .unwrap_or("PERIODIC_ANALYSIS")
                .to_string(),
            summary,
            details: node
                .attributes
                .get("details")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            behavioral_adjustments: attr_string_list(node, "behavioral_adjustments"),
            configuration_adjustments: attr_string_list(node, "configuration_adjustments"),
            source_incidents: attr_string_list(node, "source_incidents"),
            source_problems: attr_string_list(node, "source_problems"),
            analysis_timestamp,
            updated_by: node.updated_by.clone(),
        })
    }
}
