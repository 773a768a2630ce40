// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Persistence
//!
//! Pure data access for tasks, thoughts, graph nodes, and correlations;
//! no policy. Two interchangeable stores share the trait surface:
//! an in-memory store for tests and development, and a SQLite store for
//! durable single-node deployments. Both guarantee read-after-write
//! within one agent instance.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::errors::Result;
use crate::tasks::{Task, TaskStatus, Thought, ThoughtStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Compact view of one thought for status output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtSummary {
    /// Thought id
    pub thought_id: String,
    /// Lifecycle status
    pub status: ThoughtStatus,
    /// First 100 characters of the content
    pub content_preview: String,
    /// Creation timestamp, RFC-3339
    pub created_at: String,
}

/// Counts by thought status plus a recent-activity sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    /// PENDING thoughts
    pub pending: usize,
    /// PROCESSING thoughts
    pub processing: usize,
    /// COMPLETED thoughts
    pub completed: usize,
    /// FAILED thoughts
    pub failed: usize,
    /// Most recent thoughts, newest first
    pub recent: Vec<ThoughtSummary>,
}

impl QueueStatus {
    /// Total thoughts across all statuses.
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Task and thought storage. Processors hold ids and request status
/// changes here; the store owns the records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Inserting an existing id is an error.
    async fn insert_task(&self, task: Task) -> Result<()>;

    /// Fetch a task by id.
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>>;

    /// Set a task's status, stamping `updated_at`.
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    /// All tasks with `status`, highest priority first, then oldest first.
    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    /// Count tasks with `status`.
    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<usize>;

    /// Insert a new thought. Inserting an existing id is an error.
    async fn insert_thought(&self, thought: Thought) -> Result<()>;

    /// Fetch a thought by id.
    async fn get_thought(&self, thought_id: &str) -> Result<Option<Thought>>;

    /// Batch fetch thoughts by id; missing ids are simply absent.
    async fn thoughts_by_ids(&self, thought_ids: &[String]) -> Result<HashMap<String, Thought>>;

    /// Set a thought's status and optionally its final action, stamping
    /// `updated_at`.
    async fn update_thought_status(
        &self,
        thought_id: &str,
        status: ThoughtStatus,
        final_action: Option<Value>,
    ) -> Result<()>;

    /// All thoughts spawned from `task_id`, oldest first.
    async fn thoughts_for_task(&self, task_id: &str) -> Result<Vec<Thought>>;

    /// PENDING thoughts whose source task is ACTIVE, oldest first.
    async fn pending_thoughts_for_active_tasks(&self, limit: usize) -> Result<Vec<Thought>>;

    /// Count thoughts with `status`.
    async fn count_thoughts_by_status(&self, status: ThoughtStatus) -> Result<usize>;

    /// Most recent thoughts, newest first.
    async fn recent_thoughts(&self, limit: usize) -> Result<Vec<Thought>>;

    /// Counts by status plus a small recent sample.
    async fn queue_status(&self) -> Result<QueueStatus> {
        let recent = self
            .recent_thoughts(5)
            .await?
            .into_iter()
            .map(|thought| ThoughtSummary {
                thought_id: thought.thought_id,
                status: thought.status,
                content_preview: thought.content.chars().take(100).collect(),
                created_at: thought.created_at.to_rfc3339(),
            })
            .collect();
        Ok(QueueStatus {
            pending: self.count_thoughts_by_status(ThoughtStatus::Pending).await?,
            processing: self
                .count_thoughts_by_status(ThoughtStatus::Processing)
                .await?,
            completed: self
                .count_thoughts_by_status(ThoughtStatus::Completed)
                .await?,
            failed: self.count_thoughts_by_status(ThoughtStatus::Failed).await?,
            recent,
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_status_total() {
        let status = QueueStatus {
            pending: 2,
            processing: 1,
            completed: 5,
            failed: 1,
            recent: Vec::new(),
        };
        assert_eq!(status.total(), 9);
    }
}
