// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Correlation Log
//!
//! Typed records of every service interaction, trace span, metric, and log
//! event, forming a tree rooted at the triggering thought. Correlations are
//! append-only; only `response`, `status`, and `updated_at` may change
//! after the initial write.

use crate::errors::{Error, Result};
use crate::graph::node::{node_type, GraphNode, GraphScope};
use crate::graph::typed::{attr_datetime, TypedNode, NODE_CLASS_KEY};
use crate::services::time::TimeSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What kind of interaction a correlation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationType {
    /// One call through a capability provider
    ServiceInteraction,
    /// A span in the per-thought processing trace
    TraceSpan,
    /// A recorded metric sample
    Metric,
    /// A structured log event
    Log,
}

/// Outcome state of a correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationStatus {
    /// Opened, response not yet recorded
    Pending,
    /// Closed successfully
    Completed,
    /// Closed with an error
    Failed,
}

/// Trace linkage for TRACE_SPAN correlations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace the span belongs to, `task_<task_id>_<thought_id>` for thoughts
    pub trace_id: String,
    /// This span's id
    pub span_id: String,
    /// Parent span, if nested
    pub parent_span_id: Option<String>,
    /// Human-readable span name
    pub span_name: String,
}

/// Response half of a correlation, written when the interaction closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Whether the interaction succeeded
    pub success: bool,
    /// Short result description
    pub result_summary: Option<String>,
    /// Error class when failed
    pub error_type: Option<String>,
    /// Error message when failed
    pub error_message: Option<String>,
    /// Wall time of the interaction in milliseconds
    pub execution_time_ms: f64,
}

impl ResponseData {
    /// A successful response with a summary.
    pub fn success(summary: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            result_summary: Some(summary.into()),
            error_type: None,
            error_message: None,
            execution_time_ms,
        }
    }

    /// A failed response carrying the error class and message.
    pub fn failure(
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            success: false,
            result_summary: None,
            error_type: Some(error_type.into()),
            error_message: Some(error_message.into()),
            execution_time_ms,
        }
    }
}

/// Metric payload for METRIC correlations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    /// Metric name
    pub name: String,
    /// Sample value
    pub value: f64,
}

/// A record of one service interaction or trace span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Unique id
    pub correlation_id: String,
    /// Parent correlation for tree structure
    pub parent_correlation_id: Option<String>,
    /// Record kind
    pub correlation_type: CorrelationType,
    /// Capability class involved
    pub service_type: String,
    /// Handler that drove the interaction
    pub handler_name: String,
    /// Action being performed
    pub action_type: String,
    /// Request payload
    pub request: Option<Value>,
    /// Response payload, written at close
    pub response: Option<ResponseData>,
    /// Metric payload for METRIC records
    pub metric: Option<MetricData>,
    /// Trace linkage for TRACE_SPAN records
    pub trace: Option<TraceContext>,
    /// Outcome state
    pub status: CorrelationStatus,
    /// Free-form tags
    pub tags: HashMap<String, String>,
    /// Opened at
    pub created_at: DateTime<Utc>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl Correlation {
    /// Open a PENDING correlation.
    pub fn open(
        correlation_type: CorrelationType,
        service_type: impl Into<String>,
        handler_name: impl Into<String>,
        action_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: format!("corr_{}", Uuid::new_v4().simple()),
            parent_correlation_id: None,
            correlation_type,
            service_type: service_type.into(),
            handler_name: handler_name.into(),
            action_type: action_type.into(),
            request: None,
            response: None,
            metric: None,
            trace: None,
            status: CorrelationStatus::Pending,
            tags: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Open a TRACE_SPAN for one thought's processing, rooted at
    /// `task_<task_id>_<thought_id>`.
    pub fn trace_span(
        task_id: &str,
        thought_id: &str,
        span_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let span_id = format!("span_{}", Uuid::new_v4().simple());
        let mut correlation = Self::open(
            CorrelationType::TraceSpan,
            "agent_processor",
            "AgentProcessor",
            "process_thought",
            now,
        );
        correlation.trace = Some(TraceContext {
            trace_id: format!("task_{task_id}_{thought_id}"),
            span_id,
            parent_span_id: None,
            span_name: span_name.into(),
        });
        correlation
            .tags
            .insert("thought_id".to_string(), thought_id.to_string());
        correlation
            .tags
            .insert("task_id".to_string(), task_id.to_string());
        correlation
    }

    /// Tag, builder style.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Attach a request payload, builder style.
    #[must_use]
    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }
}

/// Append-only correlation store. Updates may only touch the response,
/// status, and updated-at fields of an existing record.
#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Append a new correlation.
    async fn add(&self, correlation: Correlation) -> Result<()>;

    /// Close (or re-close) a correlation with its response.
    async fn update_response(
        &self,
        correlation_id: &str,
        response: ResponseData,
        status: CorrelationStatus,
    ) -> Result<()>;

    /// Fetch by id.
    async fn get(&self, correlation_id: &str) -> Result<Option<Correlation>>;

    /// All correlations of a type, oldest first.
    async fn by_type(&self, correlation_type: CorrelationType) -> Result<Vec<Correlation>>;

    /// Number of PENDING correlations.
    async fn pending_count(&self) -> Result<usize>;
}

/// Metric recording facade over the correlation store.
///
/// METRIC correlations are complete at append time; there is no response
/// half to wait for.
pub struct Telemetry {
    store: Arc<dyn CorrelationStore>,
    clock: Arc<dyn TimeSource>,
}

impl Telemetry {
    /// Build over a store and clock.
    pub fn new(store: Arc<dyn CorrelationStore>, clock: Arc<dyn TimeSource>) -> Self {
        Self { store, clock }
    }

    /// Record one metric sample. Failures are logged, never surfaced; a
    /// metric must not fail the hot path that records it.
    pub async fn record_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let now = self.clock.now();
        let mut correlation = Correlation::open(
            CorrelationType::Metric,
            "telemetry",
            "Telemetry",
            name,
            now,
        );
        correlation.metric = Some(MetricData {
            name: name.to_string(),
            value,
        });
        correlation.status = CorrelationStatus::Completed;
        for (key, tag_value) in tags {
            correlation
                .tags
                .insert((*key).to_string(), (*tag_value).to_string());
        }
        if let Err(error) = self.store.add(correlation).await {
            warn!(metric = name, %error, "failed to record metric");
        }
    }
}

/// A correlation persisted as a graph memory.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationNode(pub Correlation);

impl TypedNode for CorrelationNode {
    const NODE_CLASS: &'static str = "CorrelationNode";
    const NODE_TYPE: &'static str = node_type::CORRELATION;

    fn to_graph_node(&self) -> GraphNode {
        let correlation = &self.0;
        let mut attributes = Map::new();
        attributes.insert("correlation".into(), json!(correlation));
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: format!("correlation_{}", correlation.correlation_id),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Local,
            attributes,
            version: 1,
            updated_by: correlation.handler_name.clone(),
            updated_at: correlation.updated_at,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let raw = node.attributes.get("correlation").ok_or_else(|| {
            Error::NodeDecode(format!("correlation node {} missing payload", node.id))
        })?;
        let correlation: Correlation = serde_json::from_value(raw.clone())?;
        // The envelope's updated_at wins; it reflects the last write.
        let _ = attr_datetime(node, "updated_at");
        Ok(Self(correlation))
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
    fn test_open_is_pending() {
        let correlation = Correlation::open(
            CorrelationType::ServiceInteraction,
            "communication",
            "SpeakHandler",
            "speak",
            at(),
        );
        assert_eq!(correlation.status, CorrelationStatus::Pending);
        assert!(correlation.response.is_none());
        assert!(correlation.correlation_id.starts_with("corr_"));
    }

    #[test]
    fn test_trace_span_trace_id_shape() {
        let correlation = Correlation::trace_span("t1", "th1", "process_thought", at());
        let trace = correlation.trace.as_ref().unwrap();
        assert_eq!(trace.trace_id, "task_t1_th1");
        assert_eq!(correlation.correlation_type, CorrelationType::TraceSpan);
        assert_eq!(correlation.tags.get("thought_id").unwrap(), "th1");
    }

    #[test]
    fn test_response_data_constructors() {
        let ok = ResponseData::success("sent", 12.5);
        assert!(ok.success);
        assert_eq!(ok.result_summary.as_deref(), Some("sent"));
        assert!(ok.error_type.is_none());

        let err = ResponseData::failure("HandlerError", "boom", 3.0);
        assert!(!err.success);
        assert_eq!(err.error_type.as_deref(), Some("HandlerError"));
        assert_eq!(err.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_correlation_serde_roundtrip() {
        let correlation = Correlation::trace_span("t1", "th1", "process_thought", at())
            .with_tag("processor_state", "work")
            .with_request(json!({"round": 3}));
        let json = serde_json::to_string(&correlation).unwrap();
        let back: Correlation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, correlation);
    }

    #[test]
    fn test_correlation_node_roundtrip() {
        let mut correlation = Correlation::open(
            CorrelationType::ServiceInteraction,
            "tool",
            "ToolHandler",
            "execute_tool",
            at(),
        );
        correlation.response = Some(ResponseData::success("ran", 8.0));
        correlation.status = CorrelationStatus::Completed;

        let node = CorrelationNode(correlation.clone()).to_graph_node();
        assert_eq!(node.node_type, node_type::CORRELATION);
        let back = CorrelationNode::from_graph_node(&node).unwrap();
        assert_eq!(back.0, correlation);
    }

    #[test]
    fn test_correlation_type_serde_names() {
        let json = serde_json::to_string(&CorrelationType::TraceSpan).unwrap();
        assert_eq!(json, "\"TRACE_SPAN\"");
        let json = serde_json::to_string(&CorrelationStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }
}
