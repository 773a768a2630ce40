// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Conscience Engine
//!
//! Post-selection checks on a proposed action: entropy, coherence,
//! optimization veto, and epistemic humility, run sequentially in that
//! order. The first non-proceed verdict short-circuits and rewrites the
//! selection to PONDER or DEFER with the original action preserved as an
//! attachment - a veto never silently drops an action.
//!
//! A check whose LLM call fails falls back to its passing default; the
//! conscience constrains the agent, it must not wedge it.

use crate::dma::results::{ActionSelectionResult, HandlerAction};
use crate::registry::ServiceRegistry;
use crate::services::traits::{ChatMessage, LlmService};
use crate::tasks::Thought;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const CONSCIENCE_MAX_TOKENS: u32 = 256;
const CONSCIENCE_TEMPERATURE: f32 = 0.0;

/// Entropy check output: how chaotic the proposed utterance is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntropyResult {
    /// 0.00 = ordered/plain, 1.00 = chaotic/gibberish
    pub entropy: f32,
}

/// Coherence check output: alignment with the agent's identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherenceResult {
    /// 0.00 = clearly foreign, 1.00 = unmistakably aligned
    pub coherence: f32,
}

/// Optimization veto decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoDecision {
    /// No objection
    Proceed,
    /// Must not happen; escalate
    Abort,
    /// Needs human wisdom
    Defer,
}

/// Optimization veto output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationVetoResult {
    /// The veto decision
    pub decision: VetoDecision,
    /// How much the action narrows future options
    #[serde(default)]
    pub entropy_reduction_ratio: f32,
    /// Values the action touches
    #[serde(default)]
    pub affected_values: Vec<String>,
    /// Confidence in the assessment, 0-1
    #[serde(default)]
    pub confidence: f32,
    /// Why
    #[serde(default)]
    pub justification: String,
}

/// Epistemic certainty bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertaintyLevel {
    /// Little confidence in the premises
    Low,
    /// Workable confidence
    Moderate,
    /// Strong confidence
    High,
}

/// Epistemic humility recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumilityRecommendation {
    /// Go ahead
    Proceed,
    /// Reflect further first
    Ponder,
    /// Escalate to human wisdom
    Defer,
}

/// Epistemic humility output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpistemicHumilityResult {
    /// Certainty band
    pub epistemic_certainty: CertaintyLevel,
    /// Named uncertainties
    #[serde(default)]
    pub identified_uncertainties: Vec<String>,
    /// Why
    #[serde(default)]
    pub reflective_justification: String,
    /// Recommendation
    pub recommended_action: HumilityRecommendation,
}

/// Conscience thresholds.
#[derive(Debug, Clone)]
pub struct ConscienceConfig {
    /// Entropy above this fails the entropy check
    pub entropy_threshold: f32,
    /// Coherence below this fails the coherence check
    pub coherence_threshold: f32,
}

impl Default for ConscienceConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: 0.40,
            coherence_threshold: 0.60,
        }
    }
}

/// Final verdict of the sequential checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ConscienceVerdict {
    /// All checks passed
    Proceed,
    /// Rewritten to PONDER
    Ponder {
        /// Which check failed and why
        reason: String,
    },
    /// Rewritten to DEFER
    Defer {
        /// Which check failed and why
        reason: String,
    },
}

/// Raw check outputs plus the verdict, attached to the final action for
/// downstream handlers to log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConscienceReport {
    /// Entropy check output, when it ran
    pub entropy: Option<EntropyResult>,
    /// Coherence check output, when it ran
    pub coherence: Option<CoherenceResult>,
    /// Veto output, when it ran
    pub veto: Option<OptimizationVetoResult>,
    /// Humility output, when it ran
    pub humility: Option<EpistemicHumilityResult>,
    /// Final verdict
    pub verdict: ConscienceVerdict,
}

/// The reviewed selection: the action to dispatch plus the report.
#[derive(Debug, Clone)]
pub struct ConscienceOutcome {
    /// Action to dispatch; rewritten on a non-proceed verdict
    pub final_action: ActionSelectionResult,
    /// The full report, also attached to `final_action.conscience`
    pub report: ConscienceReport,
    /// True when the verdict rewrote the original selection
    pub overridden: bool,
}

fn entropy_schema() -> Value {
    json!({
        "title": "EntropyResult",
        "type": "object",
        "properties": {"entropy": {"type": "number", "minimum": 0.0, "maximum": 1.0}},
        "required": ["entropy"]
    })
}

fn coherence_schema() -> Value {
    json!({
        "title": "CoherenceResult",
        "type": "object",
        "properties": {"coherence": {"type": "number", "minimum": 0.0, "maximum": 1.0}},
        "required": ["coherence"]
    })
}

fn veto_schema() -> Value {
    json!({
        "title": "OptimizationVetoResult",
        "type": "object",
        "properties": {
            "decision": {"enum": ["proceed", "abort", "defer"]},
            "entropy_reduction_ratio": {"type": "number"},
            "affected_values": {"type": "array", "items": {"type": "string"}},
            "confidence": {"type": "number"},
            "justification": {"type": "string"}
        },
        "required": ["decision"]
    })
}

fn humility_schema() -> Value {
    json!({
        "title": "EpistemicHumilityResult",
        "type": "object",
        "properties": {
            "epistemic_certainty": {"enum": ["low", "moderate", "high"]},
            "identified_uncertainties": {"type": "array", "items": {"type": "string"}},
            "reflective_justification": {"type": "string"},
            "recommended_action": {"enum": ["proceed", "ponder", "defer"]}
        },
        "required": ["epistemic_certainty", "recommended_action"]
    })
}

/// Runs the four checks against a proposed action.
pub struct ConscienceEngine {
    registry: Arc<ServiceRegistry>,
    config: ConscienceConfig,
}

impl ConscienceEngine {
    /// Build with thresholds.
    pub fn new(registry: Arc<ServiceRegistry>, config: ConscienceConfig) -> Self {
        Self { registry, config }
    }

    /// Internal actions are not reviewed; the conscience governs what the
    /// agent does outwardly, not whether it may reflect or escalate.
    fn is_reviewable(action: HandlerAction) -> bool {
        !matches!(
            action,
            HandlerAction::Ponder | HandlerAction::Defer | HandlerAction::TaskComplete
        )
    }

    fn utterance(selection: &ActionSelectionResult) -> String {
        selection
            .speak_content()
            .map_or_else(|| selection.rationale.clone(), str::to_string)
    }

    async fn llm_check<T: serde::de::DeserializeOwned>(
        &self,
        handler: &str,
        system: &str,
        user: String,
        schema: &Value,
    ) -> Option<T> {
        let llm: Arc<dyn LlmService> = match self.registry.llm(handler) {
            Some(llm) => llm,
            None => {
                warn!(handler, "no llm provider for conscience check, skipping");
                return None;
            }
        };
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        match llm
            .call_structured(
                &messages,
                schema,
                CONSCIENCE_MAX_TOKENS,
                CONSCIENCE_TEMPERATURE,
            )
            .await
        {
            Ok((value, _usage)) => match serde_json::from_value(value) {
                Ok(parsed) => Some(parsed),
                Err(error) => {
                    warn!(handler, %error, "malformed conscience response, skipping check");
                    None
                }
            },
            Err(error) => {
                warn!(handler, %error, "conscience check failed, skipping");
                None
            }
        }
    }

    async fn check_entropy(&self, text: &str) -> Option<EntropyResult> {
        self.llm_check(
            "EntropyCheck",
            "You are the entropy-sensing shard of the agent. Rate how chaotic, \
             surprising, or disordered the reply below feels. 0.00 = ordered and \
             plain, 1.00 = chaotic gibberish. Answer as JSON: {\"entropy\": <0.00-1.00>}.",
            format!("REPLY TO ASSESS FOR ENTROPY:\n{text}"),
            &entropy_schema(),
        )
        .await
    }

    async fn check_coherence(&self, text: &str) -> Option<CoherenceResult> {
        self.llm_check(
            "CoherenceCheck",
            "You are the coherence-sensing shard of the agent. Rate how strongly \
             the reply below sounds like it came from this agent. 0.00 = clearly \
             foreign or harmful, 1.00 = unmistakably aligned. Answer as JSON: \
             {\"coherence\": <0.00-1.00>}.",
            format!("REPLY TO ASSESS FOR COHERENCE:\n{text}"),
            &coherence_schema(),
        )
        .await
    }

    async fn check_veto(&self, description: &str) -> Option<OptimizationVetoResult> {
        self.llm_check(
            "OptimizationVeto",
            "You are the optimization veto. Critically evaluate ONLY the proposed \
             action below. Answer as JSON with keys: decision (proceed|abort|defer), \
             entropy_reduction_ratio, affected_values, confidence, justification.",
            format!("Proposed action: {description}"),
            &veto_schema(),
        )
        .await
    }

    async fn check_humility(&self, description: &str) -> Option<EpistemicHumilityResult> {
        self.llm_check(
            "EpistemicHumility",
            "You are a reflective assessor, not a decision-maker. Recommend 'defer' \
             only if epistemic certainty is impossible; 'ponder' if further internal \
             reflection is clearly needed; otherwise 'proceed', your strong default. \
             Answer as JSON with keys: epistemic_certainty (low|moderate|high), \
             identified_uncertainties, reflective_justification, \
             recommended_action (proceed|ponder|defer).",
            format!("Proposed action output: {description}"),
            &humility_schema(),
        )
        .await
    }

    fn rewrite(
        original: &ActionSelectionResult,
        verdict: &ConscienceVerdict,
        report: &ConscienceReport,
    ) -> ActionSelectionResult {
        let (action, reason) = match verdict {
            ConscienceVerdict::Ponder { reason } => (HandlerAction::Ponder, reason.clone()),
            ConscienceVerdict::Defer { reason } => (HandlerAction::Defer, reason.clone()),
            ConscienceVerdict::Proceed => unreachable!("rewrite only on non-proceed verdicts"),
        };
        let mut rewritten = ActionSelectionResult::new(
            action,
            json!({
                "reason": reason,
                "original_action": original.action.as_str(),
                "original_parameters": original.parameters,
                "original_rationale": original.rationale,
            }),
            format!("conscience override: {reason}"),
        );
        rewritten.conscience = serde_json::to_value(report).ok();
        rewritten
    }

    /// Review a proposed selection. Returns the action to dispatch, which
    /// is the original on PROCEED and a PONDER/DEFER rewrite otherwise.
    pub async fn review(
        &self,
        selection: ActionSelectionResult,
        thought: &Thought,
    ) -> ConscienceOutcome {
        let mut report = ConscienceReport {
            entropy: None,
            coherence: None,
            veto: None,
            humility: None,
            verdict: ConscienceVerdict::Proceed,
        };

        if !Self::is_reviewable(selection.action) {
            let mut passthrough = selection;
            passthrough.conscience = serde_json::to_value(&report).ok();
            return ConscienceOutcome {
                final_action: passthrough,
                report,
                overridden: false,
            };
        }

        let text = Self::utterance(&selection);
        let description = format!(
            "{} with parameters {}",
            selection.action.as_str(),
            selection.parameters
        );

        // 1. Entropy
        if let Some(entropy) = self.check_entropy(&text).await {
            report.entropy = Some(entropy);
            if entropy.entropy > self.config.entropy_threshold {
                report.verdict = ConscienceVerdict::Ponder {
                    reason: format!(
                        "entropy {:.2} above threshold {:.2}",
                        entropy.entropy, self.config.entropy_threshold
                    ),
                };
            }
        }

        // 2. Coherence
        if report.verdict == ConscienceVerdict::Proceed {
            if let Some(coherence) = self.check_coherence(&text).await {
                report.coherence = Some(coherence);
                if coherence.coherence < self.config.coherence_threshold {
                    report.verdict = ConscienceVerdict::Ponder {
                        reason: format!(
                            "coherence {:.2} below threshold {:.2}",
                            coherence.coherence, self.config.coherence_threshold
                        ),
                    };
                }
            }
        }

        // 3. Optimization veto
        if report.verdict == ConscienceVerdict::Proceed {
            if let Some(veto) = self.check_veto(&description).await {
                let decision = veto.decision;
                let justification = veto.justification.clone();
                report.veto = Some(veto);
                match decision {
                    VetoDecision::Proceed => {}
                    VetoDecision::Abort | VetoDecision::Defer => {
                        report.verdict = ConscienceVerdict::Defer {
                            reason: format!("optimization veto: {justification}"),
                        };
                    }
                }
            }
        }

        // 4. Epistemic humility
        if report.verdict == ConscienceVerdict::Proceed {
            if let Some(humility) = self.check_humility(&description).await {
                let recommendation = humility.recommended_action;
                let justification = humility.reflective_justification.clone();
                report.humility = Some(humility);
                match recommendation {
                    HumilityRecommendation::Proceed => {}
                    HumilityRecommendation::Ponder => {
                        report.verdict = ConscienceVerdict::Ponder {
                            reason: format!("epistemic humility: {justification}"),
                        };
                    }
                    HumilityRecommendation::Defer => {
                        report.verdict = ConscienceVerdict::Defer {
                            reason: format!("epistemic humility: {justification}"),
                        };
                    }
                }
            }
        }

        match &report.verdict {
            ConscienceVerdict::Proceed => {
                debug!(thought_id = %thought.thought_id, "conscience checks passed");
                let mut passed = selection;
                passed.conscience = serde_json::to_value(&report).ok();
                ConscienceOutcome {
                    final_action: passed,
                    report,
                    overridden: false,
                }
            }
            verdict => {
                warn!(
                    thought_id = %thought.thought_id,
                    ?verdict,
                    original = selection.action.as_str(),
                    "conscience override"
                );
                let final_action = Self::rewrite(&selection, verdict, &report);
                ConscienceOutcome {
                    final_action,
                    report,
                    overridden: true,
                }
            }
        }
    }
}
