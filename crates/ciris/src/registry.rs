// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Service Registry
//!
//! Priority-ordered lookup of capability providers with per-provider
//! circuit breakers. Handlers request capabilities by [`ServiceType`];
//! handler-specific registrations take precedence over global ones.
//! Lookup is deterministic for a fixed provider list and breaker state.

use crate::services::traits::{
    AuditService, CommunicationService, LlmService, MemoryService, ToolService,
    WiseAuthorityService,
};
use crate::services::ServiceType;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{info, warn};

/// Provider priority. Lower value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Must-win providers (the platform's own adapters)
    Critical,
    /// Preferred providers
    High,
    /// Default
    Normal,
    /// Fallbacks
    Low,
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Requests blocked, cooling down
    Open,
    /// Probing with live traffic after cooldown
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before an OPEN circuit half-opens
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-provider circuit breaker. Opens after N consecutive failures,
/// half-opens after a cooldown, closes again on a success.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// A CLOSED breaker with the given tuning.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Current state. An OPEN breaker whose cooldown has elapsed reports
    /// (and becomes) HALF_OPEN.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|opened_at| opened_at.elapsed())
                .unwrap_or_default();
            if elapsed >= self.config.cooldown {
                inner.state = BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            // A half-open probe that fails re-opens immediately.
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Open => {}
        }
    }

    /// Force the breaker open (tests and operator tooling).
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
    }
}

/// The concrete capability instance a provider exposes.
#[derive(Clone)]
pub enum ServiceHandle {
    /// Message transport
    Communication(Arc<dyn CommunicationService>),
    /// Tool execution
    Tool(Arc<dyn ToolService>),
    /// Human wisdom escalation
    WiseAuthority(Arc<dyn WiseAuthorityService>),
    /// Structured LLM completion
    Llm(Arc<dyn LlmService>),
    /// Graph memory
    Memory(Arc<dyn MemoryService>),
    /// Audit sink
    Audit(Arc<dyn AuditService>),
}

impl ServiceHandle {
    /// The capability class of this handle.
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceHandle::Communication(_) => ServiceType::Communication,
            ServiceHandle::Tool(_) => ServiceType::Tool,
            ServiceHandle::WiseAuthority(_) => ServiceType::WiseAuthority,
            ServiceHandle::Llm(_) => ServiceType::Llm,
            ServiceHandle::Memory(_) => ServiceType::Memory,
            ServiceHandle::Audit(_) => ServiceType::Audit,
        }
    }
}

/// One registered capability provider.
pub struct Provider {
    /// Provider name, for logs and metadata
    pub name: String,
    /// The capability instance
    pub handle: ServiceHandle,
    /// Lookup priority
    pub priority: Priority,
    /// Capabilities this provider declares
    pub capabilities: HashSet<String>,
    /// Free-form metadata
    pub metadata: Map<String, Value>,
    /// This provider's circuit breaker
    pub breaker: CircuitBreaker,
    order: u64,
}

impl Provider {
    /// Build a provider with default breaker tuning and no metadata.
    pub fn new(
        name: impl Into<String>,
        handle: ServiceHandle,
        priority: Priority,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            priority,
            capabilities: capabilities.into_iter().collect(),
            metadata: Map::new(),
            breaker: CircuitBreaker::new(BreakerConfig::default()),
            order: 0,
        }
    }

    fn covers(&self, required: &[&str]) -> bool {
        required
            .iter()
            .all(|capability| self.capabilities.contains(*capability))
    }
}

/// Priority-ordered provider lookup with circuit breakers.
pub struct ServiceRegistry {
    by_handler: RwLock<HashMap<(String, ServiceType), Vec<Arc<Provider>>>>,
    global: RwLock<HashMap<ServiceType, Vec<Arc<Provider>>>>,
    required: RwLock<Vec<ServiceType>>,
    next_order: AtomicU64,
    changed: Notify,
}

impl ServiceRegistry {
    /// An empty registry with no readiness requirements.
    pub fn new() -> Self {
        Self {
            by_handler: RwLock::new(HashMap::new()),
            global: RwLock::new(HashMap::new()),
            required: RwLock::new(Vec::new()),
            next_order: AtomicU64::new(0),
            changed: Notify::new(),
        }
    }

    /// Declare the service types [`ServiceRegistry::wait_ready`] gates on.
    pub fn set_required(&self, required: Vec<ServiceType>) {
        *self.required.write() = required;
        self.changed.notify_waiters();
    }

    /// Register a provider globally for its service type.
    pub fn register_global(&self, provider: Provider) {
        let mut provider = provider;
        provider.order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let service_type = provider.handle.service_type();
        info!(provider = %provider.name, %service_type, "registered global provider");
        let mut global = self.global.write();
        let providers = global.entry(service_type).or_default();
        providers.push(Arc::new(provider));
        providers.sort_by_key(|provider| (provider.priority, provider.order));
        drop(global);
        self.changed.notify_waiters();
    }

    /// Register a provider for a specific handler name.
    pub fn register_for_handler(&self, handler: &str, provider: Provider) {
        let mut provider = provider;
        provider.order = self.next_order.fetch_add(1, Ordering::SeqCst);
        let service_type = provider.handle.service_type();
        info!(provider = %provider.name, handler, %service_type, "registered handler provider");
        let mut by_handler = self.by_handler.write();
        let providers = by_handler
            .entry((handler.to_string(), service_type))
            .or_default();
        providers.push(Arc::new(provider));
        providers.sort_by_key(|provider| (provider.priority, provider.order));
        drop(by_handler);
        self.changed.notify_waiters();
    }

    /// Remove a provider by name everywhere it is registered.
    pub fn unregister(&self, name: &str) {
        {
            let mut global = self.global.write();
            for providers in global.values_mut() {
                providers.retain(|provider| provider.name != name);
            }
        }
        {
            let mut by_handler = self.by_handler.write();
            for providers in by_handler.values_mut() {
                providers.retain(|provider| provider.name != name);
            }
        }
        self.changed.notify_waiters();
    }

    fn first_usable(providers: &[Arc<Provider>], required: &[&str]) -> Option<Arc<Provider>> {
        providers
            .iter()
            .find(|provider| provider.breaker.state() != BreakerState::Open && provider.covers(required))
            .cloned()
    }

    /// Find the best provider for `(handler, service_type)` whose circuit
    /// is not OPEN and whose capabilities cover `required`. Falls back to
    /// global providers. Ties break by registration order.
    pub fn get_service(
        &self,
        handler: &str,
        service_type: ServiceType,
        required: &[&str],
    ) -> Option<Arc<Provider>> {
        let by_handler = self.by_handler.read();
        if let Some(providers) = by_handler.get(&(handler.to_string(), service_type)) {
            if let Some(provider) = Self::first_usable(providers, required) {
                return Some(provider);
            }
        }
        drop(by_handler);

        let global = self.global.read();
        global
            .get(&service_type)
            .and_then(|providers| Self::first_usable(providers, required))
    }

    /// Typed communication lookup.
    pub fn communication(&self, handler: &str) -> Option<Arc<dyn CommunicationService>> {
        match self.get_service(handler, ServiceType::Communication, &[])?.handle {
            ServiceHandle::Communication(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// Typed tool lookup.
    pub fn tool(&self, handler: &str) -> Option<Arc<dyn ToolService>> {
        match self.get_service(handler, ServiceType::Tool, &[])?.handle {
            ServiceHandle::Tool(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// Typed wise-authority lookup.
    pub fn wise_authority(&self, handler: &str) -> Option<Arc<dyn WiseAuthorityService>> {
        match self.get_service(handler, ServiceType::WiseAuthority, &[])?.handle {
            ServiceHandle::WiseAuthority(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// Typed LLM lookup.
    pub fn llm(&self, handler: &str) -> Option<Arc<dyn LlmService>> {
        match self.get_service(handler, ServiceType::Llm, &[])?.handle {
            ServiceHandle::Llm(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// Typed memory lookup.
    pub fn memory(&self, handler: &str) -> Option<Arc<dyn MemoryService>> {
        match self.get_service(handler, ServiceType::Memory, &[])?.handle {
            ServiceHandle::Memory(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// Typed audit lookup.
    pub fn audit(&self, handler: &str) -> Option<Arc<dyn AuditService>> {
        match self.get_service(handler, ServiceType::Audit, &[])?.handle {
            ServiceHandle::Audit(ref service) => Some(service.clone()),
            _ => None,
        }
    }

    /// The default channel of the best communication provider that has one.
    pub fn default_channel(&self) -> Option<String> {
        let global = self.global.read();
        let providers = global.get(&ServiceType::Communication)?;
        providers.iter().find_map(|provider| {
            if provider.breaker.state() == BreakerState::Open {
                return None;
            }
            match &provider.handle {
                ServiceHandle::Communication(service) => service.default_channel(),
                _ => None,
            }
        })
    }

    fn is_ready(&self) -> bool {
        let required = self.required.read();
        let global = self.global.read();
        required.iter().all(|service_type| {
            global
                .get(service_type)
                .is_some_and(|providers| {
                    providers
                        .iter()
                        .any(|provider| provider.breaker.state() != BreakerState::Open)
                })
        })
    }

    /// Resolve once every required service type has at least one provider
    /// whose circuit is CLOSED or HALF_OPEN. Fails with
    /// [`crate::errors::Error::NotReady`] on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> crate::errors::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_ready() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(?timeout, "service registry readiness wait timed out");
                return Err(crate::errors::Error::NotReady(timeout));
            }
            // A notification can land between the readiness check and the
            // first poll of `notified`; the short sleep bounds that race.
            let notified = self.changed.notified();
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(Duration::from_millis(50)) => {}
                () = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    /// Report the outcome of a call through `provider`, driving its breaker.
    pub fn report_outcome(&self, provider: &Provider, success: bool) {
        if success {
            provider.breaker.record_success();
        } else {
            provider.breaker.record_failure();
            if provider.breaker.state() == BreakerState::Open {
                warn!(provider = %provider.name, "circuit breaker opened");
            }
        }
        self.changed.notify_waiters();
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Error, Result};
    use crate::graph::InMemoryGraphStore;
    use crate::services::time::SystemClock;
    use crate::services::traits::{ChatMessage, ResourceUsage};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NullLlm;

    #[async_trait]
    impl LlmService for NullLlm {
        async fn call_structured(
            &self,
            _messages: &[ChatMessage],
            _response_schema: &Value,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<(Value, ResourceUsage)> {
            Ok((Value::Null, ResourceUsage::default()))
        }
    }

    fn llm_provider(name: &str, priority: Priority) -> Provider {
        Provider::new(
            name,
            ServiceHandle::Llm(Arc::new(NullLlm)),
            priority,
            ["call_structured".to_string()],
        )
    }

    fn memory_provider(name: &str) -> Provider {
        let store = Arc::new(InMemoryGraphStore::new(Arc::new(SystemClock)));
        Provider::new(name, ServiceHandle::Memory(store), Priority::Normal, [])
    }

    #[test]
    fn test_lookup_prefers_priority_then_registration_order() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("normal-first", Priority::Normal));
        registry.register_global(llm_provider("high-later", Priority::High));
        registry.register_global(llm_provider("normal-second", Priority::Normal));

        let provider = registry
            .get_service("AnyHandler", ServiceType::Llm, &[])
            .unwrap();
        assert_eq!(provider.name, "high-later");
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("a", Priority::Normal));
        registry.register_global(llm_provider("b", Priority::Normal));

        for _ in 0..10 {
            let provider = registry
                .get_service("AnyHandler", ServiceType::Llm, &[])
                .unwrap();
            assert_eq!(provider.name, "a");
        }
    }

    #[test]
    fn test_handler_specific_beats_global() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("global", Priority::Critical));
        registry.register_for_handler("SpeakHandler", llm_provider("mine", Priority::Low));

        let provider = registry
            .get_service("SpeakHandler", ServiceType::Llm, &[])
            .unwrap();
        assert_eq!(provider.name, "mine");

        let provider = registry
            .get_service("OtherHandler", ServiceType::Llm, &[])
            .unwrap();
        assert_eq!(provider.name, "global");
    }

    #[test]
    fn test_open_breaker_is_skipped() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("primary", Priority::High));
        registry.register_global(llm_provider("fallback", Priority::Low));

        let primary = registry
            .get_service("H", ServiceType::Llm, &[])
            .unwrap();
        assert_eq!(primary.name, "primary");
        primary.breaker.trip();

        let fallback = registry.get_service("H", ServiceType::Llm, &[]).unwrap();
        assert_eq!(fallback.name, "fallback");
    }

    #[test]
    fn test_all_open_returns_none() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("only", Priority::Normal));
        registry
            .get_service("H", ServiceType::Llm, &[])
            .unwrap()
            .breaker
            .trip();
        assert!(registry.get_service("H", ServiceType::Llm, &[]).is_none());
    }

    #[test]
    fn test_capability_filter() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("plain", Priority::High));

        assert!(registry
            .get_service("H", ServiceType::Llm, &["call_structured"])
            .is_some());
        assert!(registry
            .get_service("H", ServiceType::Llm, &["vision"])
            .is_none());
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        });
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_breaker_success_resets() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(60),
        });
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_breaker_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(0),
        });
        breaker.record_failure();
        // Zero cooldown: the next state check half-opens.
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_wait_ready_resolves_on_registration() {
        let registry = Arc::new(ServiceRegistry::new());
        registry.set_required(vec![ServiceType::Memory]);

        let waiter = registry.clone();
        let wait = tokio::spawn(async move { waiter.wait_ready(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.register_global(memory_provider("mem"));

        wait.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let registry = ServiceRegistry::new();
        registry.set_required(vec![ServiceType::Communication]);
        let error = registry
            .wait_ready(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotReady(_)));
    }

    #[tokio::test]
    async fn test_wait_ready_no_requirements_is_immediate() {
        let registry = ServiceRegistry::new();
        registry.wait_ready(Duration::from_millis(10)).await.unwrap();
    }

    #[test]
    fn test_unregister_removes_everywhere() {
        let registry = ServiceRegistry::new();
        registry.register_global(llm_provider("gone", Priority::Normal));
        registry.register_for_handler("H", llm_provider("gone", Priority::Normal));
        registry.unregister("gone");
        assert!(registry.get_service("H", ServiceType::Llm, &[]).is_none());
    }
}
