// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Tasks and Thoughts
//!
//! A task is a durable unit of intended work targeting a channel; a thought
//! is one cognitive step spawned from a task. Tasks and thoughts reference
//! each other by id only; traversal goes through the task store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a task. Transitions are monotonic:
/// PENDING -> ACTIVE -> {COMPLETED | FAILED | DEFERRED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be activated
    Pending,
    /// Being worked on
    Active,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Escalated to a wise authority
    Deferred,
}

impl TaskStatus {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(next, TaskStatus::Active | TaskStatus::Failed),
            TaskStatus::Active => matches!(
                next,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Deferred
            ),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Deferred => false,
        }
    }

    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Deferred
        )
    }
}

/// Lifecycle status of a thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThoughtStatus {
    /// Queued for a future round
    Pending,
    /// Claimed by the current round
    Processing,
    /// Produced its final action
    Completed,
    /// Failed; `final_action` carries the reason
    Failed,
}

impl ThoughtStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ThoughtStatus::Completed | ThoughtStatus::Failed)
    }
}

/// Kind of cognitive step a thought represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    /// Seed or step thought created from a task
    Standard,
    /// Created by a handler after it acted
    FollowUp,
    /// Reflection requested by a PONDER action or a DMA failure
    Ponder,
    /// Internal bookkeeping
    Meta,
}

/// Context a task carries about where it came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Channel the task's output targets
    pub channel_id: String,
    /// User that caused the task, when there is one
    pub user_id: Option<String>,
    /// Correlation id tying the task's actions together
    pub correlation_id: String,
    /// Parent task id, for step tasks
    pub parent_task_id: Option<String>,
}

/// A durable unit of intended work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable id
    pub task_id: String,
    /// Home channel for the task's output
    pub channel_id: String,
    /// Free-text description of the work
    pub description: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Higher runs first
    pub priority: i32,
    /// Parent task id, for step tasks
    pub parent_task_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last status-change timestamp
    pub updated_at: DateTime<Utc>,
    /// Origin context
    pub context: TaskContext,
}

impl Task {
    /// Build a PENDING task with a fresh correlation id.
    pub fn new(
        task_id: impl Into<String>,
        channel_id: impl Into<String>,
        description: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        let task_id = task_id.into();
        let channel_id = channel_id.into();
        Self {
            task_id: task_id.clone(),
            channel_id: channel_id.clone(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            parent_task_id: None,
            created_at: now,
            updated_at: now,
            context: TaskContext {
                channel_id,
                user_id: None,
                correlation_id: format!("task_{}", Uuid::new_v4().simple()),
                parent_task_id: None,
            },
        }
    }

    /// Attach a parent, builder style.
    #[must_use]
    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        let parent = parent_task_id.into();
        self.parent_task_id = Some(parent.clone());
        self.context.parent_task_id = Some(parent);
        self
    }

    /// Set the initial status, builder style.
    #[must_use]
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// Context a thought carries through the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThoughtContext {
    /// Source task id
    pub task_id: String,
    /// Channel the eventual action targets
    pub channel_id: String,
    /// Round the thought was created in
    pub round_number: u32,
    /// Correlation id inherited from the task
    pub correlation_id: String,
}

/// One cognitive step on a task. Each thought produces at most one final
/// action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Stable id
    pub thought_id: String,
    /// Task this thought works on
    pub source_task_id: String,
    /// Kind of step
    pub thought_type: ThoughtType,
    /// Lifecycle status
    pub status: ThoughtStatus,
    /// What the thought is about
    pub content: String,
    /// Round the thought was created in
    pub round_number: u32,
    /// 0 for seed thoughts; follow-ups and ponders increment
    pub depth: u32,
    /// Thought that spawned this one
    pub parent_thought_id: Option<String>,
    /// Final action outcome, set on COMPLETED/FAILED
    pub final_action: Option<Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last status-change timestamp
    pub updated_at: DateTime<Utc>,
    /// Pipeline context
    pub context: ThoughtContext,
}

impl Thought {
    /// Build a PENDING seed thought for a task.
    pub fn seed(task: &Task, round_number: u32, now: DateTime<Utc>) -> Self {
        Self {
            thought_id: generate_thought_id(ThoughtType::Standard, &task.task_id),
            source_task_id: task.task_id.clone(),
            thought_type: ThoughtType::Standard,
            status: ThoughtStatus::Pending,
            content: task.description.clone(),
            round_number,
            depth: 0,
            parent_thought_id: None,
            final_action: None,
            created_at: now,
            updated_at: now,
            context: ThoughtContext {
                task_id: task.task_id.clone(),
                channel_id: task.channel_id.clone(),
                round_number,
                correlation_id: task.context.correlation_id.clone(),
            },
        }
    }

    /// Build a child thought one level deeper than `parent`.
    pub fn child_of(
        parent: &Thought,
        thought_type: ThoughtType,
        content: impl Into<String>,
        round_number: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            thought_id: generate_thought_id(thought_type, &parent.source_task_id),
            source_task_id: parent.source_task_id.clone(),
            thought_type,
            status: ThoughtStatus::Pending,
            content: content.into(),
            round_number,
            depth: parent.depth + 1,
            parent_thought_id: Some(parent.thought_id.clone()),
            final_action: None,
            created_at: now,
            updated_at: now,
            context: ThoughtContext {
                round_number,
                ..parent.context.clone()
            },
        }
    }
}

/// Generate a thought id carrying its type and source task for log greppability.
pub fn generate_thought_id(thought_type: ThoughtType, task_id: &str) -> String {
    let tag = match thought_type {
        ThoughtType::Standard => "th",
        ThoughtType::FollowUp => "fu",
        ThoughtType::Ponder => "po",
        ThoughtType::Meta => "me",
    };
    let task_fragment: String = task_id.chars().take(16).collect();
    format!("{tag}_{task_fragment}_{}", Uuid::new_v4().simple())
}
