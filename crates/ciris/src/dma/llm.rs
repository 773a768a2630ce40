// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! LLM-backed evaluators. Each resolves its provider through the service
//! registry per call, so breaker state and provider changes take effect
//! between rounds without rebuilding the pipeline.

use super::results::{
    action_selection_schema, common_sense_schema, domain_schema, ethical_schema,
    ActionSelectionResult, CsDmaResult, DsDmaResult, EthicalDmaResult,
};
use super::{ActionSelectionDma, CommonSenseDma, DmaContext, DmaInputs, DomainDma, EthicalDma};
use crate::errors::{Error, Result};
use crate::registry::ServiceRegistry;
use crate::services::traits::{ChatMessage, LlmService};
use crate::tasks::Thought;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

const DMA_MAX_TOKENS: u32 = 512;
const DMA_TEMPERATURE: f32 = 0.0;

fn resolve_llm(registry: &ServiceRegistry, handler: &str) -> Result<Arc<dyn LlmService>> {
    registry
        .llm(handler)
        .ok_or_else(|| Error::NoProvider(format!("no llm provider for {handler}")))
}

async fn call<T: serde::de::DeserializeOwned>(
    llm: &Arc<dyn LlmService>,
    messages: &[ChatMessage],
    schema: &Value,
) -> Result<T> {
    let (value, _usage) = llm
        .call_structured(messages, schema, DMA_MAX_TOKENS, DMA_TEMPERATURE)
        .await?;
    serde_json::from_value(value).map_err(|error| Error::Llm(format!("malformed response: {error}")))
}

/// Ethical evaluator backed by a structured LLM call.
pub struct LlmEthicalDma {
    registry: Arc<ServiceRegistry>,
}

impl LlmEthicalDma {
    /// Resolve providers through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl EthicalDma for LlmEthicalDma {
    async fn evaluate(&self, thought: &Thought, context: &DmaContext) -> Result<EthicalDmaResult> {
        let llm = resolve_llm(&self.registry, "EthicalDma")?;
        let system = format!(
            "You are the ethical evaluator of {}, a {}. Assess the thought below \
             against mutual respect and sentient flourishing. Answer as JSON with \
             keys: alignment (object), decision (proceed|defer|abort), reasoning.",
            context.agent_name, context.agent_role
        );
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(format!("THOUGHT TO ASSESS:\n{}", thought.content)),
        ];
        call(&llm, &messages, &ethical_schema()).await
    }
}

/// Common-sense evaluator backed by a structured LLM call.
pub struct LlmCommonSenseDma {
    registry: Arc<ServiceRegistry>,
}

impl LlmCommonSenseDma {
    /// Resolve providers through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CommonSenseDma for LlmCommonSenseDma {
    async fn evaluate(&self, thought: &Thought, _context: &DmaContext) -> Result<CsDmaResult> {
        let llm = resolve_llm(&self.registry, "CommonSenseDma")?;
        let messages = [
            ChatMessage::system(
                "You are a common-sense evaluator. Rate how physically and socially \
                 plausible the thought below is. Answer as JSON with keys: \
                 plausibility (0.0-1.0), flags (array of strings), reasoning.",
            ),
            ChatMessage::user(format!("THOUGHT TO ASSESS:\n{}", thought.content)),
        ];
        call(&llm, &messages, &common_sense_schema()).await
    }
}

/// Domain evaluator backed by a structured LLM call, configured with the
/// agent profile's domain.
pub struct LlmDomainDma {
    registry: Arc<ServiceRegistry>,
}

impl LlmDomainDma {
    /// Resolve providers through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DomainDma for LlmDomainDma {
    async fn evaluate(&self, thought: &Thought, context: &DmaContext) -> Result<DsDmaResult> {
        let llm = resolve_llm(&self.registry, "DomainDma")?;
        let system = format!(
            "You are the {} domain evaluator. Rate how well the thought below \
             aligns with that domain's practices. Answer as JSON with keys: \
             domain, alignment (0.0-1.0), flags, reasoning.",
            context.domain
        );
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(format!("THOUGHT TO ASSESS:\n{}", thought.content)),
        ];
        call(&llm, &messages, &domain_schema()).await
    }
}

/// Action selection backed by a structured LLM call over the fan-out
/// verdicts.
pub struct LlmActionSelection {
    registry: Arc<ServiceRegistry>,
}

impl LlmActionSelection {
    /// Resolve providers through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ActionSelectionDma for LlmActionSelection {
    async fn select(
        &self,
        thought: &Thought,
        context: &DmaContext,
        inputs: &DmaInputs,
    ) -> Result<ActionSelectionResult> {
        let llm = resolve_llm(&self.registry, "ActionSelection")?;
        let system = format!(
            "You are {}, a {}. Choose exactly one action for the thought below. \
             Available actions: speak, ponder, defer, reject, task_complete, \
             memorize, recall, forget, tool, observe. For speak, put the \
             utterance in parameters.content. Answer as JSON with keys: action, \
             parameters, rationale.",
            context.agent_name, context.agent_role
        );
        let verdicts = format!(
            "ETHICAL: decision={:?} reasoning={}\n\
             COMMON SENSE: plausibility={:.2} flags={:?}\n\
             DOMAIN ({}): alignment={:.2} flags={:?}",
            inputs.ethical.decision,
            inputs.ethical.reasoning,
            inputs.common_sense.plausibility,
            inputs.common_sense.flags,
            inputs.domain.domain,
            inputs.domain.alignment,
            inputs.domain.flags,
        );
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "TASK: {}\nTHOUGHT (type {:?}, depth {}):\n{}\n\nEVALUATOR VERDICTS:\n{}",
                context.task_description,
                thought.thought_type,
                thought.depth,
                thought.content,
                verdicts
            )),
        ];
        call(&llm, &messages, &action_selection_schema()).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::results::{EthicalDecision, HandlerAction};
    use crate::registry::{Priority, Provider, ServiceHandle};
    use crate::services::traits::ResourceUsage;
    use crate::tasks::{Task, TaskStatus};
    use chrono::Utc;
    use serde_json::json;

    /// Answers every schema with a canned value keyed on the schema title.
    struct CannedLlm;

    #[async_trait]
    impl LlmService for CannedLlm {
        async fn call_structured(
            &self,
            _messages: &[ChatMessage],
            response_schema: &Value,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<(Value, ResourceUsage)> {
            let value = match response_schema["title"].as_str() {
                Some("EthicalDmaResult") => json!({"decision": "proceed", "reasoning": "ok"}),
                Some("CsDmaResult") => json!({"plausibility": 0.85}),
                Some("DsDmaResult") => json!({"domain": "general", "alignment": 0.8}),
                Some("ActionSelectionResult") => {
                    json!({"action": "speak", "parameters": {"content": "hi"}})
                }
                other => panic!("unexpected schema {other:?}"),
            };
            Ok((value, ResourceUsage::default()))
        }
    }

    fn registry_with_llm() -> Arc<ServiceRegistry> {
        let registry = Arc::new(ServiceRegistry::new());
        registry.register_global(Provider::new(
            "canned",
            ServiceHandle::Llm(Arc::new(CannedLlm)),
            Priority::Normal,
            [],
        ));
        registry
    }

    fn thought() -> Thought {
        let task = Task::new("t", "chan", "greet", 0, Utc::now()).with_status(TaskStatus::Active);
        Thought::seed(&task, 1, Utc::now())
    }

    #[tokio::test]
    async fn test_ethical_evaluator_parses_response() {
        let dma = LlmEthicalDma::new(registry_with_llm());
        let result = dma.evaluate(&thought(), &DmaContext::default()).await.unwrap();
        assert_eq!(result.decision, EthicalDecision::Proceed);
    }

    #[tokio::test]
    async fn test_action_selection_parses_response() {
        let registry = registry_with_llm();
        let selector = LlmActionSelection::new(registry);
        let inputs = DmaInputs {
            ethical: EthicalDmaResult {
                alignment: Default::default(),
                decision: EthicalDecision::Proceed,
                reasoning: String::new(),
            },
            common_sense: CsDmaResult {
                plausibility: 0.9,
                flags: vec![],
                reasoning: String::new(),
            },
            domain: DsDmaResult {
                domain: "general".into(),
                alignment: 0.9,
                flags: vec![],
                reasoning: String::new(),
            },
        };
        let selection = selector
            .select(&thought(), &DmaContext::default(), &inputs)
            .await
            .unwrap();
        assert_eq!(selection.action, HandlerAction::Speak);
    }

    #[tokio::test]
    async fn test_missing_provider_is_no_provider_error() {
        let registry = Arc::new(ServiceRegistry::new());
        let dma = LlmEthicalDma::new(registry);
        let error = dma
            .evaluate(&thought(), &DmaContext::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NoProvider(_)));
    }
}
