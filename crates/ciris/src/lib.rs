// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # CIRIS Cognitive Core
//!
//! An autonomous agent runtime: messages become tasks, tasks spawn
//! thoughts, and every thought runs through a pipeline of decision-making
//! evaluators (DMAs) and conscience checks before its chosen action is
//! dispatched through a handler registry.
//!
//! The core is a cooperative state machine. The [`agent::AgentProcessor`]
//! owns a persistent task/thought queue and drives it through the
//! cognitive states - WAKEUP, WORK, PLAY, SOLITUDE, DREAM, SHUTDOWN -
//! with full correlation tracking and a graceful, auditable shutdown.
//!
//! External collaborators (transports, LLM providers, audit sinks) plug
//! in through the capability traits in [`services`] and are looked up
//! through the [`registry::ServiceRegistry`], which wraps every provider
//! in a circuit breaker.
//!
//! ## Quick tour
//!
//! ```rust,ignore
//! use ciris::context::AppContext;
//! use ciris::agent::{AgentConfig, AgentProcessor};
//!
//! // Assemble stores, registry, and processors (see ciris-cli for the
//! // full wiring), then run the agent to completion:
//! // let agent = AgentProcessor::new(ctx, deps, graph, AgentConfig::default());
//! // agent.run().await?;
//! ```

pub mod agent;
pub mod config;
pub mod conscience;
pub mod context;
pub mod correlations;
pub mod dispatch;
pub mod dma;
pub mod errors;
pub mod graph;
pub mod handlers;
pub mod incidents;
pub mod persistence;
pub mod processors;
pub mod registry;
pub mod services;
pub mod state;
pub mod tasks;

pub use agent::{AgentConfig, AgentProcessor, AgentStatus};
pub use context::{AgentIdentity, AppContext, ShutdownSignal, WorkflowLimits};
pub use errors::{Error, Result};
pub use state::AgentState;
