// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Action Handlers
//!
//! One handler per [`HandlerAction`]. Handlers own the success path of a
//! thought: they perform the action against capability providers, mark
//! the thought COMPLETED, and spawn follow-up thoughts where the action
//! calls for one. Grouped by what they touch: external surfaces, control
//! flow, and graph memory.

pub mod control;
pub mod external;
pub mod memory;

pub use control::{DeferHandler, PonderHandler, RejectHandler, TaskCompleteHandler};
pub use external::{ObserveHandler, SpeakHandler, ToolHandler};
pub use memory::{ForgetHandler, MemorizeHandler, RecallHandler};

use crate::dispatch::ActionHandler;
use crate::dma::results::HandlerAction;
use crate::errors::Result;
use crate::persistence::TaskStore;
use crate::registry::ServiceRegistry;
use crate::services::time::TimeSource;
use crate::tasks::ThoughtStatus;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared dependencies every handler needs.
pub struct HandlerDeps {
    /// Task/thought storage
    pub store: Arc<dyn TaskStore>,
    /// Capability lookup
    pub registry: Arc<ServiceRegistry>,
    /// Timestamp source
    pub clock: Arc<dyn TimeSource>,
}

impl HandlerDeps {
    /// Bundle the dependencies.
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<ServiceRegistry>,
        clock: Arc<dyn TimeSource>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            clock,
        })
    }

    pub(crate) async fn complete_thought(
        &self,
        thought_id: &str,
        final_action: Value,
    ) -> Result<()> {
        self.store
            .update_thought_status(thought_id, ThoughtStatus::Completed, Some(final_action))
            .await
    }
}

/// The full default handler map.
pub fn default_handlers(deps: Arc<HandlerDeps>) -> HashMap<HandlerAction, Arc<dyn ActionHandler>> {
    let mut handlers: HashMap<HandlerAction, Arc<dyn ActionHandler>> = HashMap::new();
    handlers.insert(
        HandlerAction::Speak,
        Arc::new(SpeakHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Ponder,
        Arc::new(PonderHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Defer,
        Arc::new(DeferHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Reject,
        Arc::new(RejectHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::TaskComplete,
        Arc::new(TaskCompleteHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Memorize,
        Arc::new(MemorizeHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Recall,
        Arc::new(RecallHandler::new(deps.clone())),
    );
    handlers.insert(
        HandlerAction::Forget,
        Arc::new(ForgetHandler::new(deps.clone())),
    );
    handlers.insert(HandlerAction::Tool, Arc::new(ToolHandler::new(deps.clone())));
    handlers.insert(HandlerAction::Observe, Arc::new(ObserveHandler::new(deps)));
    handlers
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use crate::services::time::SystemClock;

    #[test]
    fn test_default_handlers_cover_every_action() {
        let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let registry = Arc::new(ServiceRegistry::new());
        let handlers = default_handlers(HandlerDeps::new(store, registry, clock));

        for action in [
            HandlerAction::Speak,
            HandlerAction::Ponder,
            HandlerAction::Defer,
            HandlerAction::Reject,
            HandlerAction::TaskComplete,
            HandlerAction::Memorize,
            HandlerAction::Recall,
            HandlerAction::Forget,
            HandlerAction::Tool,
            HandlerAction::Observe,
        ] {
            assert!(handlers.contains_key(&action), "missing handler for {action}");
        }
    }
}
