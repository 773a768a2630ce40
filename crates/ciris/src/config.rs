// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Graph Configuration Service
//!
//! All configuration is a versioned [`ConfigNode`] stored as a graph
//! memory. Setting a key writes a new node pointing back at the previous
//! version; older nodes are retained as history. There is no delete -
//! callers overwrite.

use crate::errors::{Error, Result};
use crate::graph::node::{node_type, GraphNode, GraphScope};
use crate::graph::typed::{attr_datetime, TypedNode, NODE_CLASS_KEY};
use crate::services::time::TimeSource;
use crate::services::traits::MemoryService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    /// Text value
    String(String),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Homogeneous-ish list
    List(Vec<Value>),
    /// Nested map
    Dict(Map<String, Value>),
}

impl ConfigValue {
    /// View as plain JSON.
    pub fn as_json(&self) -> Value {
        match self {
            ConfigValue::String(value) => json!(value),
            ConfigValue::Int(value) => json!(value),
            ConfigValue::Float(value) => json!(value),
            ConfigValue::Bool(value) => json!(value),
            ConfigValue::List(value) => Value::Array(value.clone()),
            ConfigValue::Dict(value) => Value::Object(value.clone()),
        }
    }

    /// Integer accessor.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// One version of one configuration key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigNode {
    /// Node id (unique per version)
    pub id: String,
    /// Configuration key
    pub key: String,
    /// Value at this version
    pub value: ConfigValue,
    /// Version number, starting at 1
    pub version: u32,
    /// Node id of the previous version
    pub previous_version: Option<String>,
    /// Who wrote this version
    pub updated_by: String,
    /// When this version was written
    pub updated_at: DateTime<Utc>,
}

impl TypedNode for ConfigNode {
    const NODE_CLASS: &'static str = "ConfigNode";
    const NODE_TYPE: &'static str = node_type::CONFIG;

    fn to_graph_node(&self) -> GraphNode {
        let mut attributes = Map::new();
        attributes.insert("key".into(), json!(self.key));
        attributes.insert("value".into(), json!(self.value));
        if let Some(previous) = &self.previous_version {
            attributes.insert("previous_version".into(), json!(previous));
        }
        attributes.insert(NODE_CLASS_KEY.into(), json!(Self::NODE_CLASS));

        GraphNode {
            id: self.id.clone(),
            node_type: Self::NODE_TYPE.to_string(),
            scope: GraphScope::Local,
            attributes,
            version: self.version,
            updated_by: self.updated_by.clone(),
            updated_at: self.updated_at,
        }
    }

    fn from_graph_node(node: &GraphNode) -> Result<Self> {
        let key = node
            .attr_str("key")
            .ok_or_else(|| Error::NodeDecode(format!("config node {} missing key", node.id)))?
            .to_string();
        let value = node
            .attributes
            .get("value")
            .cloned()
            .ok_or_else(|| Error::NodeDecode(format!("config node {} missing value", node.id)))?;
        let value: ConfigValue = serde_json::from_value(value)
            .map_err(|error| Error::NodeDecode(format!("config node {}: {error}", node.id)))?;
        Ok(Self {
            id: node.id.clone(),
            key,
            value,
            version: node.version,
            previous_version: node.attr_str("previous_version").map(str::to_string),
            updated_by: node.updated_by.clone(),
            updated_at: attr_datetime(node, "updated_at").unwrap_or(node.updated_at),
        })
    }
}

/// Versioned key/value configuration over the graph store.
pub struct ConfigService {
    graph: Arc<dyn MemoryService>,
    clock: Arc<dyn TimeSource>,
}

impl ConfigService {
    /// Build over a graph memory and clock.
    pub fn new(graph: Arc<dyn MemoryService>, clock: Arc<dyn TimeSource>) -> Self {
        Self { graph, clock }
    }

    async fn all_versions(&self) -> Result<Vec<ConfigNode>> {
        let nodes = self.graph.search(&format!("type:{}", node_type::CONFIG)).await?;
        let mut configs = Vec::with_capacity(nodes.len());
        for node in nodes {
            match ConfigNode::from_graph_node(&node) {
                Ok(config) => configs.push(config),
                Err(error) => {
                    // Old-format nodes must never crash callers.
                    warn!(node_id = %node.id, %error, "skipping undecodable config node");
                }
            }
        }
        Ok(configs)
    }

    /// Latest version of `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<ConfigNode>> {
        let mut versions: Vec<ConfigNode> = self
            .all_versions()
            .await?
            .into_iter()
            .filter(|config| config.key == key)
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions.into_iter().next())
    }

    /// Write a new version of `key`. Setting the current value again is a
    /// no-op.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<ConfigValue>,
        updated_by: &str,
    ) -> Result<()> {
        let value = value.into();
        let current = self.get(key).await?;

        if let Some(current) = &current {
            if current.value == value {
                debug!(key, "config unchanged, skipping update");
                return Ok(());
            }
        }

        let node = ConfigNode {
            id: format!(
                "config_{}_{}",
                key.replace('.', "_"),
                Uuid::new_v4().simple()
            ),
            key: key.to_string(),
            value,
            version: current.as_ref().map_or(1, |current| current.version + 1),
            previous_version: current.map(|current| current.id),
            updated_by: updated_by.to_string(),
            updated_at: self.clock.now(),
        };
        self.graph.memorize(node.to_graph_node()).await?;
        Ok(())
    }

    /// Every retained version of `key`, newest first.
    pub async fn history(&self, key: &str) -> Result<Vec<ConfigNode>> {
        let mut versions: Vec<ConfigNode> = self
            .all_versions()
            .await?
            .into_iter()
            .filter(|config| config.key == key)
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    /// Latest value per key, optionally filtered by key prefix.
    pub async fn list(&self, prefix: Option<&str>) -> Result<HashMap<String, ConfigValue>> {
        let mut latest: HashMap<String, ConfigNode> = HashMap::new();
        for config in self.all_versions().await? {
            if let Some(prefix) = prefix {
                if !config.key.starts_with(prefix) {
                    continue;
                }
            }
            match latest.get(&config.key) {
                Some(existing) if existing.version >= config.version => {}
                _ => {
                    latest.insert(config.key.clone(), config);
                }
            }
        }
        Ok(latest
            .into_iter()
            .map(|(key, config)| (key, config.value))
            .collect())
    }

    /// Integer convenience accessor with a default.
    pub async fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key).await {
            Ok(Some(config)) => config.value.as_i64().unwrap_or(default),
            _ => default,
        }
    }

    /// String convenience accessor with a default.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key).await {
            Ok(Some(config)) => config
                .value
                .as_str()
                .map_or_else(|| default.to_string(), str::to_string),
            _ => default.to_string(),
        }
    }
}
