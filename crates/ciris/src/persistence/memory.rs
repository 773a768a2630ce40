// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # In-Memory Store
//!
//! In-memory task/thought and correlation storage for tests and
//! development. Everything is lost when the store is dropped.

use super::TaskStore;
use crate::correlations::{
    Correlation, CorrelationStatus, CorrelationStore, CorrelationType, ResponseData,
};
use crate::errors::{Error, Result};
use crate::services::time::TimeSource;
use crate::tasks::{Task, TaskStatus, Thought, ThoughtStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory implementation of [`TaskStore`] and [`CorrelationStore`].
pub struct InMemoryStore {
    tasks: DashMap<String, Task>,
    thoughts: DashMap<String, Thought>,
    thought_order: Mutex<Vec<String>>,
    correlations: DashMap<String, Correlation>,
    correlation_order: Mutex<Vec<String>>,
    clock: Arc<dyn TimeSource>,
}

impl InMemoryStore {
    /// Create an empty store stamping updates with `clock`.
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            tasks: DashMap::new(),
            thoughts: DashMap::new(),
            thought_order: Mutex::new(Vec::new()),
            correlations: DashMap::new(),
            correlation_order: Mutex::new(Vec::new()),
            clock,
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task(&self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(Error::Persistence(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        self.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.value().clone()))
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
        entry.status = status;
        entry.updated_at = self.clock.now();
        Ok(())
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let mut found: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.task_id.cmp(&b.task_id))
        });
        Ok(found)
    }

    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<usize> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| entry.value().status == status)
            .count())
    }

    async fn insert_thought(&self, thought: Thought) -> Result<()> {
        if self.thoughts.contains_key(&thought.thought_id) {
            return Err(Error::Persistence(format!(
                "thought {} already exists",
                thought.thought_id
            )));
        }
        self.thought_order.lock().push(thought.thought_id.clone());
        self.thoughts.insert(thought.thought_id.clone(), thought);
        Ok(())
    }

    async fn get_thought(&self, thought_id: &str) -> Result<Option<Thought>> {
        Ok(self
            .thoughts
            .get(thought_id)
            .map(|entry| entry.value().clone()))
    }

    async fn thoughts_by_ids(&self, thought_ids: &[String]) -> Result<HashMap<String, Thought>> {
        Ok(thought_ids
            .iter()
            .filter_map(|id| {
                self.thoughts
                    .get(id)
                    .map(|entry| (id.clone(), entry.value().clone()))
            })
            .collect())
    }

    async fn update_thought_status(
        &self,
        thought_id: &str,
        status: ThoughtStatus,
        final_action: Option<Value>,
    ) -> Result<()> {
        let mut entry = self
            .thoughts
            .get_mut(thought_id)
            .ok_or_else(|| Error::NotFound(format!("thought {thought_id}")))?;
        entry.status = status;
        if final_action.is_some() {
            entry.final_action = final_action;
        }
        entry.updated_at = self.clock.now();
        Ok(())
    }

    async fn thoughts_for_task(&self, task_id: &str) -> Result<Vec<Thought>> {
        let mut found: Vec<Thought> = self
            .thoughts
            .iter()
            .filter(|entry| entry.value().source_task_id == task_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.thought_id.cmp(&b.thought_id))
        });
        Ok(found)
    }

    async fn pending_thoughts_for_active_tasks(&self, limit: usize) -> Result<Vec<Thought>> {
        let mut found: Vec<Thought> = self
            .thoughts
            .iter()
            .filter(|entry| {
                let thought = entry.value();
                thought.status == ThoughtStatus::Pending
                    && self
                        .tasks
                        .get(&thought.source_task_id)
                        .is_some_and(|task| task.status == TaskStatus::Active)
            })
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.thought_id.cmp(&b.thought_id))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn count_thoughts_by_status(&self, status: ThoughtStatus) -> Result<usize> {
        Ok(self
            .thoughts
            .iter()
            .filter(|entry| entry.value().status == status)
            .count())
    }

    async fn recent_thoughts(&self, limit: usize) -> Result<Vec<Thought>> {
        let order = self.thought_order.lock();
        Ok(order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.thoughts.get(id).map(|entry| entry.value().clone()))
            .collect())
    }
}

#[async_trait]
impl CorrelationStore for InMemoryStore {
    async fn add(&self, correlation: Correlation) -> Result<()> {
        if self.correlations.contains_key(&correlation.correlation_id) {
            return Err(Error::Persistence(format!(
                "correlation {} already exists",
                correlation.correlation_id
            )));
        }
        self.correlation_order
            .lock()
            .push(correlation.correlation_id.clone());
        self.correlations
            .insert(correlation.correlation_id.clone(), correlation);
        Ok(())
    }

    async fn update_response(
        &self,
        correlation_id: &str,
        response: ResponseData,
        status: CorrelationStatus,
    ) -> Result<()> {
        let mut entry = self
            .correlations
            .get_mut(correlation_id)
            .ok_or_else(|| Error::NotFound(format!("correlation {correlation_id}")))?;
        entry.response = Some(response);
        entry.status = status;
        entry.updated_at = self.clock.now();
        Ok(())
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<Correlation>> {
        Ok(self
            .correlations
            .get(correlation_id)
            .map(|entry| entry.value().clone()))
    }

    async fn by_type(&self, correlation_type: CorrelationType) -> Result<Vec<Correlation>> {
        let order = self.correlation_order.lock();
        Ok(order
            .iter()
            .filter_map(|id| self.correlations.get(id).map(|entry| entry.value().clone()))
            .filter(|correlation| correlation.correlation_type == correlation_type)
            .collect())
    }

    async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .correlations
            .iter()
            .filter(|entry| entry.value().status == CorrelationStatus::Pending)
            .count())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::time::SystemClock;
    use chrono::Utc;

    fn store() -> InMemoryStore {
        InMemoryStore::new(Arc::new(SystemClock))
    }

    fn task(id: &str, status: TaskStatus, priority: i32) -> Task {
        Task::new(id, "chan", "work", priority, Utc::now()).with_status(status)
    }

    #[tokio::test]
    async fn test_insert_and_get_task() {
        let store = store();
        store.insert_task(task("t1", TaskStatus::Pending, 0)).await.unwrap();
        let found = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(found.task_id, "t1");
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_task_insert_fails() {
        let store = store();
        store.insert_task(task("t1", TaskStatus::Pending, 0)).await.unwrap();
        assert!(store
            .insert_task(task("t1", TaskStatus::Pending, 0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_tasks_by_status_ordering() {
        let store = store();
        store.insert_task(task("low", TaskStatus::Pending, 1)).await.unwrap();
        store.insert_task(task("high", TaskStatus::Pending, 9)).await.unwrap();
        store.insert_task(task("active", TaskStatus::Active, 5)).await.unwrap();

        let pending = store.tasks_by_status(TaskStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].task_id, "high");
        assert_eq!(pending[1].task_id, "low");
    }

    #[tokio::test]
    async fn test_update_task_status_stamps_updated_at() {
        let store = store();
        let original = task("t1", TaskStatus::Pending, 0);
        let created = original.updated_at;
        store.insert_task(original).await.unwrap();

        store
            .update_task_status("t1", TaskStatus::Active)
            .await
            .unwrap();
        let found = store.get_task("t1").await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Active);
        assert!(found.updated_at >= created);
    }

    #[tokio::test]
    async fn test_pending_thoughts_for_active_tasks_only() {
        let store = store();
        let active = task("active", TaskStatus::Active, 0);
        let pending_task = task("inactive", TaskStatus::Pending, 0);
        store.insert_task(active.clone()).await.unwrap();
        store.insert_task(pending_task.clone()).await.unwrap();

        store
            .insert_thought(Thought::seed(&active, 1, Utc::now()))
            .await
            .unwrap();
        store
            .insert_thought(Thought::seed(&pending_task, 1, Utc::now()))
            .await
            .unwrap();

        let ready = store.pending_thoughts_for_active_tasks(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].source_task_id, "active");
    }

    #[tokio::test]
    async fn test_pending_thoughts_respects_limit() {
        let store = store();
        let active = task("active", TaskStatus::Active, 0);
        store.insert_task(active.clone()).await.unwrap();
        for _ in 0..7 {
            store
                .insert_thought(Thought::seed(&active, 1, Utc::now()))
                .await
                .unwrap();
        }
        let ready = store.pending_thoughts_for_active_tasks(5).await.unwrap();
        assert_eq!(ready.len(), 5);
    }

    #[tokio::test]
    async fn test_update_thought_status_keeps_prior_final_action() {
        let store = store();
        let active = task("t", TaskStatus::Active, 0);
        store.insert_task(active.clone()).await.unwrap();
        let thought = Thought::seed(&active, 1, Utc::now());
        let id = thought.thought_id.clone();
        store.insert_thought(thought).await.unwrap();

        store
            .update_thought_status(&id, ThoughtStatus::Completed, Some(serde_json::json!({"action": "speak"})))
            .await
            .unwrap();
        store
            .update_thought_status(&id, ThoughtStatus::Completed, None)
            .await
            .unwrap();

        let found = store.get_thought(&id).await.unwrap().unwrap();
        assert_eq!(found.final_action.unwrap()["action"], "speak");
    }

    #[tokio::test]
    async fn test_queue_status_counts_and_sample() {
        let store = store();
        let active = task("t", TaskStatus::Active, 0);
        store.insert_task(active.clone()).await.unwrap();
        for _ in 0..3 {
            store
                .insert_thought(Thought::seed(&active, 1, Utc::now()))
                .await
                .unwrap();
        }
        let status = store.queue_status().await.unwrap();
        assert_eq!(status.pending, 3);
        assert_eq!(status.total(), 3);
        assert_eq!(status.recent.len(), 3);
    }

    #[tokio::test]
    async fn test_correlation_add_and_update() {
        let store = store();
        let correlation = Correlation::trace_span("t1", "th1", "process_thought", Utc::now());
        let id = correlation.correlation_id.clone();
        store.add(correlation).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);

        store
            .update_response(
                &id,
                ResponseData::success("done", 4.2),
                CorrelationStatus::Completed,
            )
            .await
            .unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 0);
        let found = store.get(&id).await.unwrap().unwrap();
        assert_eq!(found.status, CorrelationStatus::Completed);
        assert!(found.response.unwrap().success);
    }

    #[tokio::test]
    async fn test_correlations_by_type_preserves_order() {
        let store = store();
        for index in 0..3 {
            let mut correlation =
                Correlation::trace_span("t", &format!("th{index}"), "process_thought", Utc::now());
            correlation.correlation_id = format!("corr_{index}");
            store.add(correlation).await.unwrap();
        }
        let spans = store.by_type(CorrelationType::TraceSpan).await.unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].correlation_id, "corr_0");
        assert_eq!(spans[2].correlation_id, "corr_2");
    }
}
