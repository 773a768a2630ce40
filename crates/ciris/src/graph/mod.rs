// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Graph Store
//!
//! Typed-node persistence. Every durable record in the core is a
//! [`GraphNode`]: configuration, incidents, problems, insights, identity
//! snapshots, timeseries summaries. Typed variants serialize to and from
//! the generic node form through [`NodeTypeRegistry`] so the store itself
//! stays schema-free.

pub mod memory;
pub mod node;
pub mod records;
pub mod typed;

pub use memory::InMemoryGraphStore;
pub use node::{node_type, GraphNode, GraphScope};
pub use records::{AuditEntry, IdentitySnapshot, TsdbSummary};
pub use typed::{DecodedNode, NodeTypeRegistry, TypedNode};
