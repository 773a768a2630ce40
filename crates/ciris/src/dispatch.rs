// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Action Dispatcher
//!
//! Routes an action-selection result to its registered handler, with
//! registry-readiness gating, hot-path metrics, and correlation tracking.
//! The dispatcher never swallows a handler failure: the thought's final
//! state is always updated and the correlation always closes.

use crate::correlations::{
    Correlation, CorrelationStatus, CorrelationStore, CorrelationType, ResponseData, Telemetry,
};
use crate::dma::results::{ActionSelectionResult, HandlerAction};
use crate::errors::{Error, Result};
use crate::persistence::TaskStore;
use crate::registry::ServiceRegistry;
use crate::services::time::TimeSource;
use crate::tasks::{Thought, ThoughtStatus};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Context handed to the handler alongside the thought.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Channel the action targets
    pub channel_id: String,
    /// Source task id
    pub task_id: String,
    /// Thought being acted on
    pub thought_id: String,
    /// Round the dispatch happens in
    pub round_number: u32,
    /// Which processor initiated the dispatch
    pub origin: String,
    /// How long to wait for registry readiness
    pub registry_timeout: Duration,
}

impl DispatchContext {
    /// Build from a thought with the default 30 s registry timeout.
    pub fn for_thought(thought: &Thought, origin: impl Into<String>, round_number: u32) -> Self {
        Self {
            channel_id: thought.context.channel_id.clone(),
            task_id: thought.source_task_id.clone(),
            thought_id: thought.thought_id.clone(),
            round_number,
            origin: origin.into(),
            registry_timeout: Duration::from_secs(30),
        }
    }
}

/// Executes one action kind against capability providers.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Handler name for logs, metrics, and registry lookups.
    fn name(&self) -> &'static str;

    /// Execute the action. The handler owns the thought's success path:
    /// it marks the thought COMPLETED and may spawn a follow-up thought,
    /// returning the follow-up's id.
    async fn handle(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<Option<String>>;
}

/// Pre-dispatch gate. Returning `false` skips the dispatch without
/// marking the thought failed.
#[async_trait]
pub trait ActionFilter: Send + Sync {
    /// Whether this action may be dispatched.
    async fn allow(&self, result: &ActionSelectionResult, context: &DispatchContext) -> bool;
}

/// Maps action types to handlers and drives one dispatch.
pub struct ActionDispatcher {
    handlers: HashMap<HandlerAction, Arc<dyn ActionHandler>>,
    filter: Option<Arc<dyn ActionFilter>>,
    registry: Arc<ServiceRegistry>,
    store: Arc<dyn TaskStore>,
    correlations: Arc<dyn CorrelationStore>,
    telemetry: Telemetry,
    clock: Arc<dyn TimeSource>,
}

impl ActionDispatcher {
    /// Assemble a dispatcher over a handler map.
    pub fn new(
        handlers: HashMap<HandlerAction, Arc<dyn ActionHandler>>,
        registry: Arc<ServiceRegistry>,
        store: Arc<dyn TaskStore>,
        correlations: Arc<dyn CorrelationStore>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        for (action, handler) in &handlers {
            info!(action = action.as_str(), handler = handler.name(), "registered action handler");
        }
        let telemetry = Telemetry::new(correlations.clone(), clock.clone());
        Self {
            handlers,
            filter: None,
            registry,
            store,
            correlations,
            telemetry,
            clock,
        }
    }

    /// Install a pre-dispatch filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn ActionFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Handler registered for `action`, if any.
    pub fn handler(&self, action: HandlerAction) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action).cloned()
    }

    async fn mark_failed_if_unhandled(&self, thought_id: &str, reason: String) {
        // A handler may already have finalised the thought (e.g. spawned a
        // follow-up and completed it) before failing; leave that outcome
        // alone.
        match self.store.get_thought(thought_id).await {
            Ok(Some(current)) if current.status.is_terminal() => {
                info!(
                    thought_id,
                    status = ?current.status,
                    "thought already handled, not overwriting with FAILED"
                );
            }
            Ok(_) => {
                if let Err(persist_error) = self
                    .store
                    .update_thought_status(
                        thought_id,
                        ThoughtStatus::Failed,
                        Some(json!({"error": reason})),
                    )
                    .await
                {
                    error!(thought_id, %persist_error, "failed to mark thought FAILED");
                }
            }
            Err(lookup_error) => {
                error!(thought_id, %lookup_error, "failed to re-read thought before FAILED mark");
            }
        }
    }

    /// Dispatch one selection. Returns `Ok` even when the handler failed;
    /// failures are recorded on the thought and its correlation. Only
    /// infrastructure errors (persistence down) surface as `Err`.
    pub async fn dispatch(
        &self,
        result: &ActionSelectionResult,
        thought: &Thought,
        context: &DispatchContext,
    ) -> Result<()> {
        let action = result.action;

        if let Some(filter) = &self.filter {
            if !filter.allow(result, context).await {
                info!(
                    thought_id = %thought.thought_id,
                    action = action.as_str(),
                    "dispatch skipped by filter"
                );
                return Ok(());
            }
        }

        let Some(handler) = self.handlers.get(&action) else {
            error!(
                thought_id = %thought.thought_id,
                action = action.as_str(),
                "no handler registered"
            );
            self.telemetry
                .record_metric(
                    &format!("handler_missing_{action}"),
                    1.0,
                    &[("source_module", "action_dispatcher")],
                )
                .await;
            self.store
                .update_thought_status(
                    &thought.thought_id,
                    ThoughtStatus::Failed,
                    Some(json!({
                        "error": "no_handler",
                        "action": action.as_str(),
                        "original_result": result,
                    })),
                )
                .await?;
            return Ok(());
        };

        if let Err(not_ready) = self.registry.wait_ready(context.registry_timeout).await {
            // Transient: put the thought back for a later round.
            warn!(
                thought_id = %thought.thought_id,
                %not_ready,
                "registry not ready, re-queueing thought"
            );
            self.store
                .update_thought_status(&thought.thought_id, ThoughtStatus::Pending, None)
                .await?;
            return Ok(());
        }

        let handler_tag: &[(&str, &str)] = &[
            ("handler", handler.name()),
            ("path_type", "hot"),
            ("source_module", "action_dispatcher"),
        ];
        self.telemetry
            .record_metric(&format!("handler_invoked_{action}"), 1.0, handler_tag)
            .await;
        self.telemetry
            .record_metric("handler_invoked_total", 1.0, handler_tag)
            .await;

        let started = self.clock.now();
        let correlation = Correlation::open(
            CorrelationType::ServiceInteraction,
            "action_handler",
            handler.name(),
            action.as_str(),
            started,
        )
        .with_tag("thought_id", thought.thought_id.clone())
        .with_tag("task_id", thought.source_task_id.clone())
        .with_request(json!({
            "parameters": result.parameters,
            "rationale": result.rationale,
            "channel_id": context.channel_id,
        }));
        let correlation_id = correlation.correlation_id.clone();
        self.correlations.add(correlation).await?;

        let outcome = handler.handle(result, thought, context).await;
        let elapsed_ms = (self.clock.now() - started).num_milliseconds() as f64;

        match outcome {
            Ok(follow_up) => {
                if let Some(follow_up_id) = &follow_up {
                    info!(
                        thought_id = %thought.thought_id,
                        %follow_up_id,
                        handler = handler.name(),
                        "handler completed with follow-up"
                    );
                }
                self.telemetry
                    .record_metric(&format!("handler_completed_{action}"), 1.0, handler_tag)
                    .await;
                self.telemetry
                    .record_metric("handler_completed_total", 1.0, handler_tag)
                    .await;
                self.correlations
                    .update_response(
                        &correlation_id,
                        ResponseData::success(
                            follow_up.unwrap_or_else(|| "handled".to_string()),
                            elapsed_ms,
                        ),
                        CorrelationStatus::Completed,
                    )
                    .await?;
            }
            Err(handler_error) => {
                error!(
                    thought_id = %thought.thought_id,
                    handler = handler.name(),
                    %handler_error,
                    "handler failed"
                );
                self.telemetry
                    .record_metric(&format!("handler_error_{action}"), 1.0, handler_tag)
                    .await;
                self.telemetry
                    .record_metric("handler_error_total", 1.0, handler_tag)
                    .await;
                self.correlations
                    .update_response(
                        &correlation_id,
                        ResponseData::failure(
                            error_type(&handler_error),
                            handler_error.to_string(),
                            elapsed_ms,
                        ),
                        CorrelationStatus::Failed,
                    )
                    .await?;
                self.mark_failed_if_unhandled(
                    &thought.thought_id,
                    format!("handler {} failed: {handler_error}", handler.name()),
                )
                .await;
            }
        }
        Ok(())
    }
}

fn error_type(error: &Error) -> &'static str {
    match error {
        Error::Configuration(_) => "Configuration",
        Error::NoProvider(_) => "NoProvider",
        Error::NotReady(_) => "NotReady",
        Error::Persistence(_) => "Persistence",
        Error::NotFound(_) => "NotFound",
        Error::InvalidTransition { .. } => "InvalidTransition",
        Error::Llm(_) => "Llm",
        Error::DmaFailure { .. } => "DmaFailure",
        Error::Handler(_) => "Handler",
        Error::NodeDecode(_) => "NodeDecode",
        Error::Communication(_) => "Communication",
        Error::Json(_) => "Json",
        Error::Io(_) => "Io",
    }
}
