// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # State Processors
//!
//! One processor per cognitive state. All share the [`StateProcessor`]
//! contract; the agent processor picks the active one each round and
//! delegates `process(round)` to it. Results are a tagged union so the
//! loop can branch on state-specific flags without downcasting.

pub mod batch;
pub mod dream;
pub mod play;
pub mod shutdown;
pub mod solitude;
pub mod thought;
pub mod wakeup;
pub mod work;

pub use batch::{ActionGuard, BatchDriver, BatchOutcome};
pub use dream::{DreamPhase, DreamProcessor};
pub use play::PlayProcessor;
pub use shutdown::ShutdownProcessor;
pub use solitude::SolitudeProcessor;
pub use thought::ThoughtProcessor;
pub use wakeup::WakeupProcessor;
pub use work::WorkProcessor;

use crate::errors::Result;
use crate::state::AgentState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of a WAKEUP round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeupResult {
    /// Thoughts driven through the pipeline this round
    pub thoughts_processed: u32,
    /// True once every step task is COMPLETED
    pub wakeup_complete: bool,
    /// Failed steps and pipeline errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
}

/// Result of a WORK round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkResult {
    /// PENDING tasks activated this round
    pub tasks_activated: u32,
    /// Thoughts driven through the pipeline this round
    pub thoughts_processed: u32,
    /// Pipeline errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
}

/// Result of a PLAY round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayResult {
    /// Thoughts driven through the pipeline this round
    pub thoughts_processed: u32,
    /// Pipeline errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
}

/// Result of a SOLITUDE round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolitudeResult {
    /// Thoughts driven through the pipeline this round
    pub thoughts_processed: u32,
    /// Pipeline errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
    /// Hint to the agent loop to return to WORK
    pub should_exit_solitude: bool,
    /// Why the hint was raised
    pub exit_reason: Option<String>,
}

/// Result of a DREAM round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DreamResult {
    /// Thoughts driven through the pipeline this round (dreams do not
    /// process thoughts; kept for the shared result surface)
    pub thoughts_processed: u32,
    /// Summary nodes written by consolidation
    pub memories_consolidated: u32,
    /// Incidents analyzed this round
    pub incidents_analyzed: u32,
    /// Phase errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
    /// True once the dream may end (EXITING reached and minimum duration
    /// respected)
    pub dream_complete: bool,
}

/// Result of a SHUTDOWN round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShutdownResult {
    /// Non-shutdown thoughts left unprocessed
    pub tasks_cleaned: u32,
    /// True once the shutdown negotiation finished
    pub shutdown_ready: bool,
    /// Pipeline errors
    pub errors: u32,
    /// Round wall time
    pub duration_seconds: f64,
}

/// Tagged union over the per-state results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum StateResult {
    /// WAKEUP round
    Wakeup(WakeupResult),
    /// WORK round
    Work(WorkResult),
    /// PLAY round
    Play(PlayResult),
    /// SOLITUDE round
    Solitude(SolitudeResult),
    /// DREAM round
    Dream(DreamResult),
    /// SHUTDOWN round
    Shutdown(ShutdownResult),
}

impl StateResult {
    /// Thoughts driven through the pipeline this round.
    pub fn thoughts_processed(&self) -> u32 {
        match self {
            StateResult::Wakeup(result) => result.thoughts_processed,
            StateResult::Work(result) => result.thoughts_processed,
            StateResult::Play(result) => result.thoughts_processed,
            StateResult::Solitude(result) => result.thoughts_processed,
            StateResult::Dream(result) => result.thoughts_processed,
            StateResult::Shutdown(_) => 0,
        }
    }

    /// Errors seen this round.
    pub fn errors(&self) -> u32 {
        match self {
            StateResult::Wakeup(result) => result.errors,
            StateResult::Work(result) => result.errors,
            StateResult::Play(result) => result.errors,
            StateResult::Solitude(result) => result.errors,
            StateResult::Dream(result) => result.errors,
            StateResult::Shutdown(result) => result.errors,
        }
    }

    /// Round wall time in seconds.
    pub fn duration_seconds(&self) -> f64 {
        match self {
            StateResult::Wakeup(result) => result.duration_seconds,
            StateResult::Work(result) => result.duration_seconds,
            StateResult::Play(result) => result.duration_seconds,
            StateResult::Solitude(result) => result.duration_seconds,
            StateResult::Dream(result) => result.duration_seconds,
            StateResult::Shutdown(result) => result.duration_seconds,
        }
    }
}

/// Counters every processor keeps.
#[derive(Default)]
pub struct ProcessorMetrics {
    items_processed: AtomicU64,
    errors: AtomicU64,
    rounds_completed: AtomicU64,
}

/// Point-in-time view of [`ProcessorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Thoughts processed over the processor's lifetime
    pub items_processed: u64,
    /// Errors over the processor's lifetime
    pub errors: u64,
    /// Rounds completed over the processor's lifetime
    pub rounds_completed: u64,
}

impl ProcessorMetrics {
    /// Record a finished round's tallies.
    pub fn record_round(&self, items: u32, errors: u32) {
        self.items_processed
            .fetch_add(u64::from(items), Ordering::Relaxed);
        self.errors.fetch_add(u64::from(errors), Ordering::Relaxed);
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_processed: self.items_processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rounds_completed: self.rounds_completed.load(Ordering::Relaxed),
        }
    }
}

/// Contract shared by every state processor.
#[async_trait]
pub trait StateProcessor: Send + Sync {
    /// The states this processor can run.
    fn supported_states(&self) -> Vec<AgentState>;

    /// Whether this processor handles `state`.
    fn can_process(&self, state: AgentState) -> bool {
        self.supported_states().contains(&state)
    }

    /// Prepare the processor's working set on state entry.
    async fn initialize(&self) -> Result<()>;

    /// Run one round.
    async fn process(&self, round_number: u32) -> Result<StateResult>;

    /// Release the working set on state exit; bounded by the agent's
    /// cleanup wait.
    async fn cleanup(&self) -> Result<()>;

    /// Lifetime counters.
    fn metrics(&self) -> MetricsSnapshot;
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_result_accessors() {
        let result = StateResult::Work(WorkResult {
            tasks_activated: 2,
            thoughts_processed: 7,
            errors: 1,
            duration_seconds: 0.25,
        });
        assert_eq!(result.thoughts_processed(), 7);
        assert_eq!(result.errors(), 1);
        assert!((result.duration_seconds() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shutdown_result_has_no_thoughts() {
        let result = StateResult::Shutdown(ShutdownResult {
            shutdown_ready: true,
            ..Default::default()
        });
        assert_eq!(result.thoughts_processed(), 0);
    }

    #[test]
    fn test_metrics_accumulate() {
        let metrics = ProcessorMetrics::default();
        metrics.record_round(5, 1);
        metrics.record_round(3, 0);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_processed, 8);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.rounds_completed, 2);
    }

    #[test]
    fn test_state_result_serializes_with_tag() {
        let result = StateResult::Wakeup(WakeupResult {
            wakeup_complete: true,
            ..Default::default()
        });
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"state\":\"wakeup\""));
        assert!(json.contains("\"wakeup_complete\":true"));
    }
}
