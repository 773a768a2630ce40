// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # App Context
//!
//! The explicit dependency bundle threaded into the agent processor:
//! service registry, clock, shutdown signal, and config handle. There is
//! no global state; OS signals set the shutdown flag on this context.

use crate::config::ConfigService;
use crate::registry::ServiceRegistry;
use crate::services::time::TimeSource;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Who the agent is, from its profile.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Agent name used in prompts and the wakeup ritual
    pub name: String,
    /// Role description used in prompts
    pub role: String,
    /// Domain the domain-specific evaluator is configured for
    pub domain: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            name: "ciris".to_string(),
            role: "autonomous agent".to_string(),
            domain: "general".to_string(),
        }
    }
}

/// Cooperative processing limits.
#[derive(Debug, Clone)]
pub struct WorkflowLimits {
    /// Tasks that may be ACTIVE at once
    pub max_active_tasks: usize,
    /// Thoughts pulled into one round's queue
    pub max_active_thoughts: usize,
    /// Thoughts processed concurrently per batch
    pub batch_size: usize,
    /// Ponder depth beyond which selection is forced to DEFER
    pub max_ponder_depth: u32,
    /// Thought depth at which a DMA failure forces DEFER instead of PONDER
    pub dma_defer_depth: u32,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_active_tasks: 10,
            max_active_thoughts: 50,
            batch_size: 5,
            max_ponder_depth: 5,
            dma_defer_depth: 2,
        }
    }
}

/// Requestable, observable shutdown flag.
///
/// Cloneable; all clones share the flag. The first request wins and its
/// reason is retained.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl ShutdownSignal {
    /// A fresh, unrequested signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown with a reason. Later requests are ignored.
    pub fn request(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            info!(%reason, "global shutdown requested");
            *current = Some(reason.clone());
            true
        });
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The first request's reason, if any.
    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Resolve once shutdown is requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if rx.borrow().is_some() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The dependency bundle the agent processor runs on.
#[derive(Clone)]
pub struct AppContext {
    /// Capability provider lookup
    pub registry: Arc<ServiceRegistry>,
    /// Timestamp source
    pub clock: Arc<dyn TimeSource>,
    /// Global shutdown flag
    pub shutdown: ShutdownSignal,
    /// Versioned configuration handle
    pub config: Arc<ConfigService>,
    /// Agent profile identity
    pub identity: AgentIdentity,
    /// Processing limits
    pub limits: WorkflowLimits,
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signal_starts_unrequested() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());
        assert!(signal.reason().is_none());
    }

    #[test]
    fn test_first_request_wins() {
        let signal = ShutdownSignal::new();
        signal.request("first");
        signal.request("second");
        assert!(signal.is_requested());
        assert_eq!(signal.reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        signal.request("stop");
        assert!(clone.is_requested());
    }

    #[tokio::test]
    async fn test_wait_resolves_on_request() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let wait = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.request("done");
        tokio::time::timeout(Duration::from_secs(1), wait)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_on_already_requested_is_immediate() {
        let signal = ShutdownSignal::new();
        signal.request("now");
        tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_default_limits() {
        let limits = WorkflowLimits::default();
        assert_eq!(limits.max_active_tasks, 10);
        assert_eq!(limits.max_active_thoughts, 50);
        assert_eq!(limits.batch_size, 5);
        assert_eq!(limits.max_ponder_depth, 5);
    }
}
