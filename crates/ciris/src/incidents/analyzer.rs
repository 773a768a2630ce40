// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Dream-cycle incident analysis: pattern detection over recent
//! incidents, problem promotion, and insight generation.
//!
//! Patterns are mined three ways - description similarity (first three
//! words, case-folded), source component, and time clustering - and
//! checked in that order. An incident links to at most one problem; once
//! linked it is excluded from later patterns, so a burst of identical
//! failures yields one problem, not three.

use crate::errors::Result;
use crate::graph::node::node_type;
use crate::graph::TypedNode;
use crate::incidents::node::{IncidentNode, IncidentStatus, InsightNode, ProblemNode};
use crate::services::time::TimeSource;
use crate::services::traits::MemoryService;
use chrono::Duration as ChronoDuration;
use serde_json::{json, Map};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

const UPDATED_BY: &str = "incident_analyzer";

/// Members needed for a description-similarity pattern.
const SIMILARITY_MIN: usize = 3;
/// Members needed for a source-component pattern.
const COMPONENT_MIN: usize = 5;
/// Members needed for a time-cluster pattern.
const CLUSTER_MIN: usize = 5;
/// Maximum gap between consecutive incidents inside one time cluster.
const CLUSTER_GAP_MINUTES: i64 = 5;
/// Members needed to promote any pattern to a problem.
const PROBLEM_MIN: usize = 3;

/// Mines incidents for patterns and problems during the DREAM state.
pub struct IncidentAnalyzer {
    graph: Arc<dyn MemoryService>,
    clock: Arc<dyn TimeSource>,
}

/// One detected pattern: a stable key and member incident ids.
type Pattern = (String, Vec<String>);

impl IncidentAnalyzer {
    /// Build over the graph memory and clock.
    pub fn new(graph: Arc<dyn MemoryService>, clock: Arc<dyn TimeSource>) -> Self {
        Self { graph, clock }
    }

    async fn recent_open_incidents(&self, hours: i64) -> Result<Vec<IncidentNode>> {
        let cutoff = self.clock.now() - ChronoDuration::hours(hours);
        let nodes = self
            .graph
            .search(&format!("type:{}", node_type::INCIDENT))
            .await?;
        let mut incidents = Vec::new();
        for node in nodes {
            match IncidentNode::from_graph_node(&node) {
                Ok(incident)
                    if incident.detected_at > cutoff && incident.status == IncidentStatus::Open =>
                {
                    incidents.push(incident);
                }
                Ok(_) => {}
                Err(decode_error) => {
                    debug!(node_id = %node.id, %decode_error, "skipping undecodable incident node");
                }
            }
        }
        incidents.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        Ok(incidents)
    }

    fn similarity_key(description: &str) -> String {
        description
            .split_whitespace()
            .take(3)
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_")
    }

    fn detect_patterns(incidents: &[IncidentNode]) -> Vec<Pattern> {
        let mut patterns = Vec::new();

        // Description similarity: first three words, case-folded.
        let mut by_description: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for incident in incidents {
            by_description
                .entry(Self::similarity_key(&incident.description))
                .or_default()
                .push(incident.id.clone());
        }
        for (key, members) in by_description {
            if members.len() >= SIMILARITY_MIN {
                patterns.push((format!("recurring_error_{key}"), members));
            }
        }

        // Source component.
        let mut by_component: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for incident in incidents {
            by_component
                .entry(incident.source_component.clone())
                .or_default()
                .push(incident.id.clone());
        }
        for (component, members) in by_component {
            if members.len() >= COMPONENT_MIN {
                patterns.push((format!("component_issues_{component}"), members));
            }
        }

        // Time clusters over the already time-sorted list.
        let gap = ChronoDuration::minutes(CLUSTER_GAP_MINUTES);
        let mut clusters: Vec<Vec<&IncidentNode>> = Vec::new();
        let mut current: Vec<&IncidentNode> = Vec::new();
        for incident in incidents {
            match current.last() {
                Some(previous) if incident.detected_at - previous.detected_at <= gap => {
                    current.push(incident);
                }
                Some(_) => {
                    clusters.push(std::mem::take(&mut current));
                    current.push(incident);
                }
                None => current.push(incident),
            }
        }
        if !current.is_empty() {
            clusters.push(current);
        }
        for (index, cluster) in clusters
            .into_iter()
            .filter(|cluster| cluster.len() >= CLUSTER_MIN)
            .enumerate()
        {
            patterns.push((
                format!("error_spike_{index}"),
                cluster.iter().map(|incident| incident.id.clone()).collect(),
            ));
        }

        patterns
    }

    fn root_causes(pattern_key: &str, members: &[&IncidentNode]) -> Vec<String> {
        let descriptions: Vec<String> = members
            .iter()
            .map(|incident| incident.description.to_lowercase())
            .collect();
        let mut causes = Vec::new();
        if descriptions.iter().any(|text| text.contains("timeout")) {
            causes.push("Timeout configuration may be too aggressive".to_string());
        }
        if descriptions.iter().any(|text| text.contains("connection")) {
            causes.push("Network connectivity or service availability issues".to_string());
        }
        if descriptions
            .iter()
            .any(|text| text.contains("memory") || text.contains("resource"))
        {
            causes.push("Resource constraints or memory pressure".to_string());
        }
        if descriptions
            .iter()
            .any(|text| text.contains("permission") || text.contains("auth"))
        {
            causes.push("Authentication or authorization configuration issues".to_string());
        }
        let components: HashSet<&str> = members
            .iter()
            .map(|incident| incident.source_component.as_str())
            .collect();
        if components.len() == 1 {
            if let Some(component) = components.into_iter().next() {
                causes.push(format!("Issue isolated to the {component} component"));
            }
        }
        if causes.is_empty() {
            causes.push(format!("Undiagnosed recurring pattern: {pattern_key}"));
        }
        causes
    }

    fn recommended_actions(pattern_key: &str, causes: &[String]) -> Vec<String> {
        let mut actions = Vec::new();
        if pattern_key.contains("timeout")
            || causes.iter().any(|cause| cause.contains("Timeout"))
        {
            actions.push("Increase timeout values in configuration".to_string());
            actions.push("Add retry logic with exponential backoff".to_string());
        }
        if causes.iter().any(|cause| cause.contains("Network")) {
            actions.push("Add connection pooling and a circuit breaker for the dependency".to_string());
        }
        if causes.iter().any(|cause| cause.contains("Resource")) {
            actions.push("Add resource usage monitoring and limits".to_string());
        }
        if pattern_key.starts_with("component_issues_") {
            let component = pattern_key.trim_start_matches("component_issues_");
            actions.push(format!("Add error handling and logging around {component}"));
        }
        if actions.is_empty() {
            actions.push("Review linked incidents for a common trigger".to_string());
        }
        actions
    }

    fn problem_statement(pattern_key: &str, members: &[&IncidentNode]) -> String {
        if pattern_key.starts_with("recurring_error_") {
            format!(
                "Recurring error: {} (occurred {} times)",
                members[0].description,
                members.len()
            )
        } else if let Some(component) = pattern_key.strip_prefix("component_issues_") {
            format!(
                "Multiple issues in the {component} component ({} incidents)",
                members.len()
            )
        } else {
            format!(
                "Error spike: {} incidents in a short time window",
                members.len()
            )
        }
    }

    fn recommendations(patterns: &[Pattern]) -> (Vec<String>, Vec<String>) {
        let mut behavioral = Vec::new();
        let mut configuration = Vec::new();
        for (key, _members) in patterns {
            if key.contains("timeout") {
                configuration.push("Consider increasing timeout values for affected operations".to_string());
                behavioral.push("Add retry logic with exponential backoff for timeout-prone operations".to_string());
            }
            if key.contains("memory") {
                configuration.push("Increase memory limits or add usage monitoring".to_string());
                behavioral.push("Add periodic cleanup to long-running operations".to_string());
            }
            if let Some(component) = key.strip_prefix("component_issues_") {
                behavioral.push(format!("Add additional error handling to {component}"));
                configuration.push(format!("Consider a circuit breaker for {component}"));
            }
        }
        behavioral.sort();
        behavioral.dedup();
        configuration.sort();
        configuration.dedup();
        (behavioral, configuration)
    }

    async fn store_incident(&self, incident: &IncidentNode) -> Result<()> {
        self.graph.memorize(incident.to_graph_node()).await?;
        Ok(())
    }

    /// Analyze the last `hours` of incidents, promote patterns to
    /// problems, and write the insight. Linked incidents become RECURRING
    /// with their `problem_id` set; the rest of the analysed set moves to
    /// INVESTIGATING.
    pub async fn process_recent_incidents(&self, hours: i64) -> Result<InsightNode> {
        let now = self.clock.now();
        let mut incidents = self.recent_open_incidents(hours).await?;
        let stamp = now.format("%Y%m%d_%H%M%S");

        if incidents.is_empty() {
            info!("no incidents in the last {hours}h");
            let insight = InsightNode {
                id: format!("incident_insight_{stamp}"),
                insight_type: "NO_INCIDENTS".to_string(),
                summary: "No incidents detected - system operating normally".to_string(),
                details: Map::from_iter([
                    ("incident_count".to_string(), json!(0)),
                    ("pattern_count".to_string(), json!(0)),
                    ("problem_count".to_string(), json!(0)),
                ]),
                behavioral_adjustments: Vec::new(),
                configuration_adjustments: Vec::new(),
                source_incidents: Vec::new(),
                source_problems: Vec::new(),
                analysis_timestamp: now,
                updated_by: UPDATED_BY.to_string(),
            };
            self.graph.memorize(insight.to_graph_node()).await?;
            return Ok(insight);
        }

        let patterns = Self::detect_patterns(&incidents);
        let mut problems: Vec<ProblemNode> = Vec::new();
        let mut linked: HashSet<String> = HashSet::new();

        for (pattern_key, member_ids) in &patterns {
            let members: Vec<&IncidentNode> = incidents
                .iter()
                .filter(|incident| {
                    member_ids.contains(&incident.id) && !linked.contains(&incident.id)
                })
                .collect();
            if members.len() < PROBLEM_MIN {
                continue;
            }

            let causes = Self::root_causes(pattern_key, &members);
            let problem = ProblemNode {
                id: format!("problem_{pattern_key}_{}", problems.len()),
                problem_statement: Self::problem_statement(pattern_key, &members),
                affected_incidents: members.iter().map(|incident| incident.id.clone()).collect(),
                status: "UNDER_INVESTIGATION".to_string(),
                recommended_actions: Self::recommended_actions(pattern_key, &causes),
                potential_root_causes: causes,
                incident_count: members.len() as u32,
                first_occurrence: members
                    .iter()
                    .map(|incident| incident.detected_at)
                    .min()
                    .unwrap_or(now),
                last_occurrence: members
                    .iter()
                    .map(|incident| incident.detected_at)
                    .max()
                    .unwrap_or(now),
                updated_by: UPDATED_BY.to_string(),
                updated_at: now,
            };
            info!(
                problem_id = %problem.id,
                incidents = problem.incident_count,
                "promoted incident pattern to problem"
            );
            self.graph.memorize(problem.to_graph_node()).await?;

            for incident_id in &problem.affected_incidents {
                linked.insert(incident_id.clone());
            }
            problems.push(problem);
        }

        // Link members to their problem; everything else analysed moves to
        // INVESTIGATING.
        for incident in &mut incidents {
            if let Some(problem) = problems
                .iter()
                .find(|problem| problem.affected_incidents.contains(&incident.id))
            {
                incident.status = IncidentStatus::Recurring;
                incident.problem_id = Some(problem.id.clone());
            } else {
                incident.status = IncidentStatus::Investigating;
            }
            incident.updated_at = now;
            self.store_incident(incident).await?;
        }

        let (behavioral, configuration) = Self::recommendations(&patterns);
        let insight = InsightNode {
            id: format!("incident_insight_{stamp}"),
            insight_type: "PERIODIC_ANALYSIS".to_string(),
            summary: format!(
                "Analyzed {} incidents, found {} patterns and identified {} problems",
                incidents.len(),
                patterns.len(),
                problems.len()
            ),
            details: Map::from_iter([
                ("incident_count".to_string(), json!(incidents.len())),
                ("pattern_count".to_string(), json!(patterns.len())),
                ("problem_count".to_string(), json!(problems.len())),
            ]),
            behavioral_adjustments: behavioral,
            configuration_adjustments: configuration,
            source_incidents: incidents.iter().map(|incident| incident.id.clone()).collect(),
            source_problems: problems.iter().map(|problem| problem.id.clone()).collect(),
            analysis_timestamp: now,
            updated_by: UPDATED_BY.to_string(),
        };
        self.graph.memorize(insight.to_graph_node()).await?;
        Ok(insight)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraphStore;
    use crate::incidents::node::IncidentSeverity;
    use crate::services::time::ManualClock;
    use crate::services::traits::MemoryQuery;
    use chrono::{TimeZone, Utc};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ))
    }

    fn incident(id: &str, description: &str, component: &str, minutes_ago: i64, clock: &ManualClock) -> IncidentNode {
        IncidentNode {
            id: id.to_string(),
            incident_type: "ERROR".into(),
            severity: IncidentSeverity::High,
            status: IncidentStatus::Open,
            description: description.to_string(),
            source_component: component.to_string(),
            detected_at: clock.now() - ChronoDuration::minutes(minutes_ago),
            correlation_id: None,
            task_id: None,
            thought_id: None,
            handler_name: None,
            filename: None,
            line_number: None,
            exception_type: None,
            stack_trace: None,
            problem_id: None,
            updated_by: "incident_capture".into(),
            updated_at: clock.now(),
        }
    }

    async fn seed(graph: &InMemoryGraphStore, incidents: &[IncidentNode]) {
        for incident in incidents {
            graph.memorize(incident.to_graph_node()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_burst_in_one_component_yields_one_problem() {
        let clock = clock();
        let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
        let incidents: Vec<IncidentNode> = (0..6)
            .map(|index| {
                incident(
                    &format!("incident_{index}"),
                    "Connection timeout to database",
                    "database_service",
                    3 - (index as i64 / 2),
                    &clock,
                )
            })
            .collect();
        seed(&graph, &incidents).await;

        let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
        let insight = analyzer.process_recent_incidents(24).await.unwrap();

        // One problem despite matching all three pattern kinds.
        assert_eq!(insight.source_problems.len(), 1);
        assert_eq!(insight.source_incidents.len(), 6);
        assert_eq!(insight.insight_type, "PERIODIC_ANALYSIS");

        // All six incidents are RECURRING and linked to that problem.
        let problem_id = &insight.source_problems[0];
        let stored = graph.recall(&MemoryQuery::by_prefix("incident_insight")).await.unwrap();
        assert_eq!(stored.len(), 1);
        for index in 0..6 {
            let nodes = graph
                .recall(&MemoryQuery::by_prefix(format!("incident_{index}")))
                .await
                .unwrap();
            let updated = IncidentNode::from_graph_node(&nodes[0]).unwrap();
            assert_eq!(updated.status, IncidentStatus::Recurring);
            assert_eq!(updated.problem_id.as_ref().unwrap(), problem_id);
        }

        // The problem carries timeout root causes and actions.
        let problems = graph.recall(&MemoryQuery::by_prefix("problem_")).await.unwrap();
        assert_eq!(problems.len(), 1);
        let problem = ProblemNode::from_graph_node(&problems[0]).unwrap();
        assert_eq!(problem.incident_count, 6);
        assert!(problem
            .potential_root_causes
            .iter()
            .any(|cause| cause.contains("Timeout")));
        assert!(problem
            .recommended_actions
            .iter()
            .any(|action| action.contains("Increase timeout")));
    }

    #[tokio::test]
    async fn test_unlinked_incidents_move_to_investigating() {
        let clock = clock();
        let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
        // Two unrelated incidents: no pattern, no problem.
        seed(
            &graph,
            &[
                incident("incident_a", "Disk almost full", "fs", 10, &clock),
                incident("incident_b", "Token refresh failed", "auth", 20, &clock),
            ],
        )
        .await;

        let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
        let insight = analyzer.process_recent_incidents(24).await.unwrap();
        assert!(insight.source_problems.is_empty());

        for id in ["incident_a", "incident_b"] {
            let nodes = graph.recall(&MemoryQuery::by_prefix(id)).await.unwrap();
            let updated = IncidentNode::from_graph_node(&nodes[0]).unwrap();
            assert_eq!(updated.status, IncidentStatus::Investigating);
            assert!(updated.problem_id.is_none());
        }
    }

    #[tokio::test]
    async fn test_no_incidents_insight() {
        let clock = clock();
        let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
        let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
        let insight = analyzer.process_recent_incidents(24).await.unwrap();
        assert_eq!(insight.insight_type, "NO_INCIDENTS");
        assert_eq!(insight.details["incident_count"], 0);
    }

    #[tokio::test]
    async fn test_old_incidents_are_ignored() {
        let clock = clock();
        let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
        let mut stale = incident("incident_old", "Connection timeout to database", "db", 0, &clock);
        stale.detected_at = clock.now() - ChronoDuration::hours(30);
        seed(&graph, &[stale]).await;

        let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
        let insight = analyzer.process_recent_incidents(24).await.unwrap();
        assert_eq!(insight.insight_type, "NO_INCIDENTS");
    }

    #[test]
    fn test_similarity_key_folds_case_and_truncates() {
        assert_eq!(
            IncidentAnalyzer::similarity_key("Connection Timeout TO database replica 3"),
            "connection_timeout_to"
        );
        assert_eq!(IncidentAnalyzer::similarity_key("boom"), "boom");
    }

    #[test]
    fn test_time_cluster_detection() {
        let clock = clock();
        // Five incidents 2 minutes apart: one cluster. A sixth 20 minutes
        // later stands alone.
        let mut incidents: Vec<IncidentNode> = (0..5)
            .map(|index| {
                incident(
                    &format!("incident_{index}"),
                    // Distinct descriptions so only time clustering fires.
                    &format!("distinct failure alpha{index} beta{index} gamma{index}"),
                    &format!("component_{index}"),
                    30 - index * 2,
                    &clock,
                )
            })
            .collect();
        incidents.push(incident(
            "incident_late",
            "very different entirely",
            "elsewhere",
            0,
            &clock,
        ));
        incidents.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));

        let patterns = IncidentAnalyzer::detect_patterns(&incidents);
        let spikes: Vec<_> = patterns
            .iter()
            .filter(|(key, _)| key.starts_with("error_spike_"))
            .collect();
        assert_eq!(spikes.len(), 1);
        assert_eq!(spikes[0].1.len(), 5);
    }
}
