// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! End-to-end incident chain: log events captured as incidents, mined
//! into a problem during a dream analysis pass, and summarised in an
//! insight.

use ciris::graph::{InMemoryGraphStore, TypedNode};
use ciris::incidents::{
    IncidentAnalyzer, IncidentCaptureLayer, IncidentNode, IncidentStatus, IncidentWriter,
    InsightNode, ProblemNode,
};
use ciris::services::time::{SystemClock, TimeSource};
use ciris::services::traits::{MemoryQuery, MemoryService};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;

fn clock() -> Arc<dyn TimeSource> {
    Arc::new(SystemClock)
}

#[tokio::test]
async fn test_captured_error_burst_becomes_one_problem() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
    let (layer, rx) = IncidentCaptureLayer::new(dir.path(), "incidents", clock.clone()).unwrap();
    let writer = IncidentWriter::spawn(rx, graph.clone());

    // Six failures from the same component within the same moment; the
    // capture layer promotes each to an incident.
    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, || {
        for attempt in 0..6 {
            tracing::error!(
                target: "database_service",
                task_id = "t1",
                "connection timeout on attempt {attempt}"
            );
        }
    });
    let written = writer.stop().await.unwrap();
    assert_eq!(written, 6);

    // Dream-cycle analysis pass.
    let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
    let insight = analyzer.process_recent_incidents(24).await.unwrap();

    // One problem covering all six, one insight referencing them.
    assert_eq!(insight.source_problems.len(), 1);
    assert_eq!(insight.source_incidents.len(), 6);

    let problems = graph.recall(&MemoryQuery::by_prefix("problem_")).await.unwrap();
    assert_eq!(problems.len(), 1);
    let problem = ProblemNode::from_graph_node(&problems[0]).unwrap();
    assert_eq!(problem.incident_count, 6);
    assert!(problem.problem_statement.contains("connection timeout"));

    // Every captured incident is now RECURRING with the problem id set.
    let incident_nodes = graph
        .recall(&MemoryQuery::by_prefix("incident_"))
        .await
        .unwrap();
    let mut recurring = 0;
    for node in &incident_nodes {
        if node.id.starts_with("incident_insight") {
            continue;
        }
        let incident = IncidentNode::from_graph_node(node).unwrap();
        assert_eq!(incident.status, IncidentStatus::Recurring);
        assert_eq!(incident.problem_id.as_deref(), Some(problem.id.as_str()));
        assert_eq!(incident.task_id.as_deref(), Some("t1"));
        recurring += 1;
    }
    assert_eq!(recurring, 6);

    // The insight round-trips out of the graph.
    let insights = graph
        .recall(&MemoryQuery::by_prefix("incident_insight_"))
        .await
        .unwrap();
    assert_eq!(insights.len(), 1);
    let stored = InsightNode::from_graph_node(&insights[0]).unwrap();
    assert_eq!(stored.source_problems, insight.source_problems);
    assert!(stored
        .configuration_adjustments
        .iter()
        .any(|adjustment| adjustment.to_lowercase().contains("timeout")));
}

#[tokio::test]
async fn test_second_analysis_pass_finds_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let graph = Arc::new(InMemoryGraphStore::new(clock.clone()));
    let (layer, rx) = IncidentCaptureLayer::new(dir.path(), "incidents", clock.clone()).unwrap();
    let writer = IncidentWriter::spawn(rx, graph.clone());

    let subscriber = tracing_subscriber::registry().with(layer);
    tracing::subscriber::with_default(subscriber, || {
        for _ in 0..3 {
            tracing::warn!(target: "filter", "suspicious message rate spike");
        }
    });
    writer.stop().await.unwrap();

    let analyzer = IncidentAnalyzer::new(graph.clone(), clock.clone());
    let first = analyzer.process_recent_incidents(24).await.unwrap();
    assert_eq!(first.source_problems.len(), 1);

    // Linked incidents left OPEN no longer exist, so the second pass sees
    // a clean slate.
    let second = analyzer.process_recent_incidents(24).await.unwrap();
    assert_eq!(second.insight_type, "NO_INCIDENTS");
}
