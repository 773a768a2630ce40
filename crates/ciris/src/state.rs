// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Agent State Machine
//!
//! The six cognitive states and the transition table between them. The
//! agent processor exclusively owns the [`StateManager`]; transitions are
//! serialized through its round loop. Once a running agent enters
//! SHUTDOWN it never leaves it - only a fresh process starts again.

use crate::errors::{Error, Result};
use crate::services::time::TimeSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// The cognitive states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Identity-affirmation ritual before any work
    Wakeup,
    /// Normal task processing
    Work,
    /// Creative low-stakes processing
    Play,
    /// Reduced-activity reflection
    Solitude,
    /// Offline consolidation and incident analysis
    Dream,
    /// Terminal state; also the pre-start state
    Shutdown,
}

impl AgentState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Wakeup => "wakeup",
            AgentState::Work => "work",
            AgentState::Play => "play",
            AgentState::Solitude => "solitude",
            AgentState::Dream => "dream",
            AgentState::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// State before; `None` only for the initial record
    pub from_state: Option<AgentState>,
    /// State after
    pub to_state: AgentState,
}

/// Owns the current state, its transition table, and the history.
pub struct StateManager {
    current: AgentState,
    entered_at: DateTime<Utc>,
    history: Vec<StateTransitionRecord>,
    has_entered_shutdown: bool,
    clock: Arc<dyn TimeSource>,
}

impl StateManager {
    /// Start in SHUTDOWN, the pre-start state.
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        let now = clock.now();
        Self {
            current: AgentState::Shutdown,
            entered_at: now,
            history: vec![StateTransitionRecord {
                timestamp: now,
                from_state: None,
                to_state: AgentState::Shutdown,
            }],
            has_entered_shutdown: false,
            clock,
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        self.current
    }

    /// Seconds spent in the current state.
    pub fn state_duration_secs(&self) -> f64 {
        (self.clock.now() - self.entered_at).num_milliseconds() as f64 / 1000.0
    }

    /// Whether the transition table allows `current -> target`.
    pub fn can_transition_to(&self, target: AgentState) -> bool {
        use AgentState::{Dream, Play, Shutdown, Solitude, Wakeup, Work};
        if target == self.current {
            return false;
        }
        match (self.current, target) {
            // The pre-start SHUTDOWN may wake exactly once; a SHUTDOWN the
            // agent entered during its run is terminal.
            (Shutdown, Wakeup) => !self.has_entered_shutdown,
            (_, Shutdown) => true,
            (Wakeup, Work) => true,
            (Work, Play | Solitude | Dream) => true,
            (Play | Solitude | Dream, Work) => true,
            _ => false,
        }
    }

    /// Perform a transition, recording it in the history.
    pub fn transition_to(&mut self, target: AgentState) -> Result<()> {
        if !self.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }
        let now = self.clock.now();
        info!(from = %self.current, to = %target, "state transition");
        self.history.push(StateTransitionRecord {
            timestamp: now,
            from_state: Some(self.current),
            to_state: target,
        });
        if target == AgentState::Shutdown {
            self.has_entered_shutdown = true;
        }
        self.current = target;
        self.entered_at = now;
        Ok(())
    }

    /// The most recent transitions, oldest first.
    pub fn history(&self, limit: usize) -> Vec<StateTransitionRecord> {
        let skip = self.history.len().saturating_sub(limit);
        self.history[skip..].to_vec()
    }
}
