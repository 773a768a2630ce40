// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Dream processor: the offline consolidation cycle. Phases advance one
//! per round - ENTERING, CONSOLIDATING, ANALYZING, CONFIGURING, PLANNING,
//! EXITING. Consolidation folds recent metric correlations into summary
//! nodes; analysis mines incidents (see
//! [`crate::incidents::IncidentAnalyzer`]); configuring records the safe
//! self-tuning recommendations; planning schedules the next dream. The
//! dream only ends after `min_duration`, and is cut short at
//! `max_duration`.

use crate::config::ConfigService;
use crate::correlations::{CorrelationStore, CorrelationType};
use crate::errors::Result;
use crate::graph::records::TsdbSummary;
use crate::graph::{node_type, GraphNode, GraphScope, TypedNode};
use crate::incidents::IncidentAnalyzer;
use crate::processors::batch::ProcessorDeps;
use crate::processors::{DreamResult, MetricsSnapshot, ProcessorMetrics, StateProcessor, StateResult};
use crate::services::traits::MemoryService;
use crate::state::AgentState;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{info, warn};

/// Hours of incidents each analysis pass looks back over.
const ANALYSIS_WINDOW_HOURS: i64 = 24;
/// Hours of metric correlations folded into one summary.
const CONSOLIDATION_WINDOW_HOURS: i64 = 6;
/// Hours until the next scheduled dream.
pub const DREAM_INTERVAL_HOURS: i64 = 6;
/// Defer window on a scheduled dream.
pub const DREAM_DEFER_WINDOW_HOURS: i64 = 2;

/// The dream cycle phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DreamPhase {
    /// Settling in
    Entering,
    /// Folding recent memories into summaries
    Consolidating,
    /// Mining incidents for patterns
    Analyzing,
    /// Recording self-tuning recommendations
    Configuring,
    /// Scheduling future work and the next dream
    Planning,
    /// Waiting out the minimum duration, then done
    Exiting,
}

/// Dream duration bounds.
#[derive(Debug, Clone)]
pub struct DreamConfig {
    /// A dream never ends before this
    pub min_duration: ChronoDuration,
    /// A dream never runs past this
    pub max_duration: ChronoDuration,
}

impl Default for DreamConfig {
    fn default() -> Self {
        Self {
            min_duration: ChronoDuration::minutes(10),
            max_duration: ChronoDuration::minutes(60),
        }
    }
}

struct DreamSession {
    phase: DreamPhase,
    started_at: DateTime<Utc>,
    memories_consolidated: u32,
    incidents_analyzed: u32,
}

/// Handles the DREAM state.
pub struct DreamProcessor {
    deps: Arc<ProcessorDeps>,
    graph: Arc<dyn MemoryService>,
    analyzer: IncidentAnalyzer,
    config_service: Arc<ConfigService>,
    config: DreamConfig,
    session: Mutex<Option<DreamSession>>,
    metrics: ProcessorMetrics,
}

impl DreamProcessor {
    /// Build over the shared deps, the graph memory, and the config handle.
    pub fn new(
        deps: Arc<ProcessorDeps>,
        graph: Arc<dyn MemoryService>,
        config_service: Arc<ConfigService>,
        config: DreamConfig,
    ) -> Self {
        Self {
            analyzer: IncidentAnalyzer::new(graph.clone(), deps.clock.clone()),
            graph,
            config_service,
            config,
            deps,
            session: Mutex::new(None),
            metrics: ProcessorMetrics::default(),
        }
    }

    /// Write a scheduled-dream concept node `hours` out from `now`.
    pub async fn schedule_dream(
        graph: &dyn MemoryService,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<String> {
        let dream_time = now + ChronoDuration::hours(hours);
        let node = GraphNode::new(
            format!("dream_schedule_{}", dream_time.timestamp()),
            node_type::CONCEPT,
            GraphScope::Local,
            "dream_processor",
            now,
        )
        .with_attribute("task_type", json!("scheduled_dream"))
        .with_attribute("scheduled_for", json!(dream_time.to_rfc3339()))
        .with_attribute("duration_minutes", json!(30))
        .with_attribute("can_defer", json!(true))
        .with_attribute("defer_window_hours", json!(DREAM_DEFER_WINDOW_HOURS));
        graph.memorize(node).await
    }

    async fn consolidate_memories(&self) -> Result<u32> {
        let now = self.deps.clock.now();
        let window_start = now - ChronoDuration::hours(CONSOLIDATION_WINDOW_HOURS);
        let metrics = self
            .deps
            .correlations
            .by_type(CorrelationType::Metric)
            .await?;

        let mut folded: Map<String, serde_json::Value> = Map::new();
        let mut source_count = 0u64;
        for correlation in metrics {
            if correlation.created_at < window_start {
                continue;
            }
            let Some(metric) = &correlation.metric else {
                continue;
            };
            source_count += 1;
            let entry = folded
                .entry(metric.name.clone())
                .or_insert_with(|| json!({"count": 0, "sum": 0.0}));
            let count = entry["count"].as_u64().unwrap_or(0) + 1;
            let sum = entry["sum"].as_f64().unwrap_or(0.0) + metric.value;
            *entry = json!({"count": count, "sum": sum});
        }

        if folded.is_empty() {
            return Ok(0);
        }

        let summary = TsdbSummary {
            id: format!("tsdb_summary_{}", now.timestamp()),
            window_start,
            window_end: now,
            metrics: folded,
            source_correlation_count: source_count,
            updated_by: "dream_processor".to_string(),
            updated_at: now,
        };
        self.graph.memorize(summary.to_graph_node()).await?;
        Ok(1)
    }

    async fn apply_safe_tuning(&self) -> Result<()> {
        // Self-tuning stays conservative: record the recommendations under
        // config for operators and later cycles, never mutate limits
        // directly.
        let insights = self
            .graph
            .search(&format!("type:{}", node_type::INSIGHT))
            .await?;
        let Some(latest) = insights.iter().max_by_key(|node| node.updated_at) else {
            return Ok(());
        };
        let recommendations = latest
            .attributes
            .get("configuration_adjustments")
            .cloned()
            .unwrap_or(json!([]));
        if recommendations.as_array().is_some_and(|list| list.is_empty()) {
            return Ok(());
        }
        self.config_service
            .set(
                "dream.pending_config_recommendations",
                crate::config::ConfigValue::List(
                    recommendations.as_array().cloned().unwrap_or_default(),
                ),
                "dream_processor",
            )
            .await
    }

    /// Whether the current session is past its minimum duration.
    fn min_elapsed(&self, session: &DreamSession) -> bool {
        self.deps.clock.now() - session.started_at >= self.config.min_duration
    }

    fn max_elapsed(&self, session: &DreamSession) -> bool {
        self.deps.clock.now() - session.started_at >= self.config.max_duration
    }
}

#[async_trait]
impl StateProcessor for DreamProcessor {
    fn supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Dream]
    }

    async fn initialize(&self) -> Result<()> {
        *self.session.lock() = Some(DreamSession {
            phase: DreamPhase::Entering,
            started_at: self.deps.clock.now(),
            memories_consolidated: 0,
            incidents_analyzed: 0,
        });
        info!("entering dream state");
        Ok(())
    }

    async fn process(&self, _round_number: u32) -> Result<StateResult> {
        let started = self.deps.clock.now();
        let mut errors = 0u32;

        let phase = {
            let session = self.session.lock();
            session.as_ref().map(|session| session.phase)
        };
        let Some(phase) = phase else {
            warn!("dream round without a session");
            return Ok(StateResult::Dream(DreamResult {
                errors: 1,
                ..Default::default()
            }));
        };

        let mut next_phase = phase;
        let mut consolidated = 0;
        let mut analyzed = 0;
        match phase {
            DreamPhase::Entering => {
                next_phase = DreamPhase::Consolidating;
            }
            DreamPhase::Consolidating => {
                match self.consolidate_memories().await {
                    Ok(count) => consolidated = count,
                    Err(consolidation_error) => {
                        warn!(%consolidation_error, "memory consolidation failed");
                        errors += 1;
                    }
                }
                next_phase = DreamPhase::Analyzing;
            }
            DreamPhase::Analyzing => {
                match self.analyzer.process_recent_incidents(ANALYSIS_WINDOW_HOURS).await {
                    Ok(insight) => {
                        analyzed = insight.source_incidents.len() as u32;
                    }
                    Err(analysis_error) => {
                        warn!(%analysis_error, "incident analysis failed");
                        errors += 1;
                    }
                }
                next_phase = DreamPhase::Configuring;
            }
            DreamPhase::Configuring => {
                if let Err(tuning_error) = self.apply_safe_tuning().await {
                    warn!(%tuning_error, "self-tuning pass failed");
                    errors += 1;
                }
                next_phase = DreamPhase::Planning;
            }
            DreamPhase::Planning => {
                if let Err(schedule_error) = Self::schedule_dream(
                    self.graph.as_ref(),
                    self.deps.clock.now(),
                    DREAM_INTERVAL_HOURS,
                )
                .await
                {
                    warn!(%schedule_error, "failed to schedule next dream");
                    errors += 1;
                }
                next_phase = DreamPhase::Exiting;
            }
            DreamPhase::Exiting => {}
        }

        let mut dream_complete = false;
        {
            let mut session_slot = self.session.lock();
            if let Some(session) = session_slot.as_mut() {
                session.memories_consolidated += consolidated;
                session.incidents_analyzed += analyzed;
                // The max duration cuts any phase short.
                if self.max_elapsed(session) {
                    next_phase = DreamPhase::Exiting;
                }
                session.phase = next_phase;
                dream_complete =
                    session.phase == DreamPhase::Exiting && self.min_elapsed(session);
            }
        }
        if dream_complete {
            info!("dream cycle complete");
        }

        self.metrics.record_round(0, errors);
        let duration = (self.deps.clock.now() - started).num_milliseconds() as f64 / 1000.0;
        Ok(StateResult::Dream(DreamResult {
            thoughts_processed: 0,
            memories_consolidated: consolidated,
            incidents_analyzed: analyzed,
            errors,
            duration_seconds: duration,
            dream_complete,
        }))
    }

    async fn cleanup(&self) -> Result<()> {
        *self.session.lock() = None;
        Ok(())
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
