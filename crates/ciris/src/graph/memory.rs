// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # In-Memory Graph Store
//!
//! A fully in-memory [`MemoryService`] for tests and local development.
//! All nodes are lost when the store is dropped.
//!
//! Writes to the same `(id, scope)` are serialized by the per-entry map
//! locking; reads iterate a snapshot.

use crate::errors::{Error, Result};
use crate::graph::node::{GraphNode, GraphScope};
use crate::services::time::TimeSource;
use crate::services::traits::{MemoryQuery, MemoryService};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// In-memory implementation of the graph memory capability.
pub struct InMemoryGraphStore {
    nodes: DashMap<(GraphScope, String), GraphNode>,
    clock: Arc<dyn TimeSource>,
}

impl InMemoryGraphStore {
    /// Create an empty store stamping writes with `clock`.
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            nodes: DashMap::new(),
            clock,
        }
    }

    /// Number of stored nodes across all scopes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes are stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn matches_query(node: &GraphNode, query: &MemoryQuery) -> bool {
        if let Some(scope) = query.scope {
            if node.scope != scope {
                return false;
            }
        }
        match query.node_id.strip_suffix('*') {
            Some(prefix) => node.id.starts_with(prefix),
            None => node.id == query.node_id,
        }
    }
}

#[async_trait]
impl MemoryService for InMemoryGraphStore {
    async fn memorize(&self, mut node: GraphNode) -> Result<String> {
        if let Some(reserved) = node.has_reserved_attribute() {
            return Err(Error::Persistence(format!(
                "node {} attribute shadows reserved key '{reserved}'",
                node.id
            )));
        }
        if node.version == 0 {
            node.version = 1;
        }
        if node.updated_by.is_empty() {
            warn!(node_id = %node.id, "memorize with empty updated_by, recording as unknown");
            node.updated_by = "unknown".to_string();
        }
        node.updated_at = self.clock.now();

        let id = node.id.clone();
        self.nodes.insert((node.scope, node.id.clone()), node);
        Ok(id)
    }

    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
        let mut found: Vec<GraphNode> = self
            .nodes
            .iter()
            .filter(|entry| Self::matches_query(entry.value(), query))
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn search(&self, query: &str) -> Result<Vec<GraphNode>> {
        let mut found: Vec<GraphNode> = if let Some(node_type) = query.strip_prefix("type:") {
            self.nodes
                .iter()
                .filter(|entry| entry.value().node_type == node_type)
                .map(|entry| entry.value().clone())
                .collect()
        } else {
            let needle = query.to_lowercase();
            self.nodes
                .iter()
                .filter(|entry| {
                    let node = entry.value();
                    node.id.to_lowercase().contains(&needle)
                        || serde_json::Value::Object(node.attributes.clone())
                            .to_string()
                            .to_lowercase()
                            .contains(&needle)
                })
                .map(|entry| entry.value().clone())
                .collect()
        };
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn forget(&self, id: &str, scope: GraphScope) -> Result<()> {
        self.nodes.remove(&(scope, id.to_string()));
        Ok(())
    }
}
