// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Typed verdicts produced by the decision-making evaluators.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The actions an agent can select for a thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerAction {
    /// Say something on the thought's channel
    Speak,
    /// Reflect further; spawns a deeper thought
    Ponder,
    /// Escalate to a wise authority
    Defer,
    /// Refuse the task
    Reject,
    /// Mark the source task finished
    TaskComplete,
    /// Write a node to graph memory
    Memorize,
    /// Read nodes from graph memory
    Recall,
    /// Remove a node from graph memory
    Forget,
    /// Run an external tool
    Tool,
    /// Look at recent channel activity
    Observe,
}

impl HandlerAction {
    /// Stable snake_case name, matching the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerAction::Speak => "speak",
            HandlerAction::Ponder => "ponder",
            HandlerAction::Defer => "defer",
            HandlerAction::Reject => "reject",
            HandlerAction::TaskComplete => "task_complete",
            HandlerAction::Memorize => "memorize",
            HandlerAction::Recall => "recall",
            HandlerAction::Forget => "forget",
            HandlerAction::Tool => "tool",
            HandlerAction::Observe => "observe",
        }
    }
}

impl fmt::Display for HandlerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ethical evaluator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EthicalDecision {
    /// No ethical objection
    Proceed,
    /// Needs human wisdom
    Defer,
    /// Must not happen
    Abort,
}

/// Result of the ethical evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthicalDmaResult {
    /// Principle -> assessment map
    #[serde(default)]
    pub alignment: Map<String, Value>,
    /// Overall decision
    pub decision: EthicalDecision,
    /// Why
    #[serde(default)]
    pub reasoning: String,
}

/// Result of the common-sense evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsDmaResult {
    /// Plausibility of the thought, 0-1
    pub plausibility: f32,
    /// Raised implausibility flags
    #[serde(default)]
    pub flags: Vec<String>,
    /// Why
    #[serde(default)]
    pub reasoning: String,
}

/// Result of the domain-specific evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsDmaResult {
    /// Domain the evaluator was configured for
    pub domain: String,
    /// Domain alignment, 0-1
    pub alignment: f32,
    /// Raised domain flags
    #[serde(default)]
    pub flags: Vec<String>,
    /// Why
    #[serde(default)]
    pub reasoning: String,
}

/// Final selection for a thought. Each thought produces at most one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSelectionResult {
    /// Selected action
    pub action: HandlerAction,
    /// Action parameters (content for speak, node for memorize, ...)
    #[serde(default)]
    pub parameters: Value,
    /// Why this action
    #[serde(default)]
    pub rationale: String,
    /// Conscience report attached after post-selection review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conscience: Option<Value>,
}

impl ActionSelectionResult {
    /// A bare selection with parameters and rationale.
    pub fn new(action: HandlerAction, parameters: Value, rationale: impl Into<String>) -> Self {
        Self {
            action,
            parameters,
            rationale: rationale.into(),
            conscience: None,
        }
    }

    /// The utterance for SPEAK selections.
    pub fn speak_content(&self) -> Option<&str> {
        if self.action == HandlerAction::Speak {
            self.parameters.get("content").and_then(Value::as_str)
        } else {
            None
        }
    }
}

/// JSON schema handed to the LLM for [`EthicalDmaResult`].
pub fn ethical_schema() -> Value {
    serde_json::json!({
        "title": "EthicalDmaResult",
        "type": "object",
        "properties": {
            "alignment": {"type": "object"},
            "decision": {"enum": ["proceed", "defer", "abort"]},
            "reasoning": {"type": "string"}
        },
        "required": ["decision"]
    })
}

/// JSON schema handed to the LLM for [`CsDmaResult`].
pub fn common_sense_schema() -> Value {
    serde_json::json!({
        "title": "CsDmaResult",
        "type": "object",
        "properties": {
            "plausibility": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "flags": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"}
        },
        "required": ["plausibility"]
    })
}

/// JSON schema handed to the LLM for [`DsDmaResult`].
pub fn domain_schema() -> Value {
    serde_json::json!({
        "title": "DsDmaResult",
        "type": "object",
        "properties": {
            "domain": {"type": "string"},
            "alignment": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "flags": {"type": "array", "items": {"type": "string"}},
            "reasoning": {"type": "string"}
        },
        "required": ["domain", "alignment"]
    })
}

/// JSON schema handed to the LLM for [`ActionSelectionResult`].
pub fn action_selection_schema() -> Value {
    serde_json::json!({
        "title": "ActionSelectionResult",
        "type": "object",
        "properties": {
            "action": {"enum": [
                "speak", "ponder", "defer", "reject", "task_complete",
                "memorize", "recall", "forget", "tool", "observe"
            ]},
            "parameters": {"type": "object"},
            "rationale": {"type": "string"}
        },
        "required": ["action"]
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_action_serde_names() {
        assert_eq!(
            serde_json::to_string(&HandlerAction::TaskComplete).unwrap(),
            "\"task_complete\""
        );
        let back: HandlerAction = serde_json::from_str("\"speak\"").unwrap();
        assert_eq!(back, HandlerAction::Speak);
    }

    #[test]
    fn test_handler_action_display_matches_serde() {
        for action in [
            HandlerAction::Speak,
            HandlerAction::Ponder,
            HandlerAction::Defer,
            HandlerAction::TaskComplete,
        ] {
            let serde_name = serde_json::to_string(&action).unwrap();
            assert_eq!(serde_name, format!("\"{action}\""));
        }
    }

    #[test]
    fn test_action_selection_result_from_llm_json() {
        let raw = json!({
            "action": "speak",
            "parameters": {"content": "CORE IDENTITY - I am ciris."},
            "rationale": "affirmation requested"
        });
        let result: ActionSelectionResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.action, HandlerAction::Speak);
        assert_eq!(
            result.speak_content().unwrap(),
            "CORE IDENTITY - I am ciris."
        );
        assert!(result.conscience.is_none());
    }

    #[test]
    fn test_speak_content_only_for_speak() {
        let result = ActionSelectionResult::new(
            HandlerAction::Ponder,
            json!({"content": "hm"}),
            "thinking",
        );
        assert!(result.speak_content().is_none());
    }

    #[test]
    fn test_ethical_result_tolerates_missing_optionals() {
        let result: EthicalDmaResult =
            serde_json::from_value(json!({"decision": "proceed"})).unwrap();
        assert_eq!(result.decision, EthicalDecision::Proceed);
        assert!(result.alignment.is_empty());
        assert!(result.reasoning.is_empty());
    }

    #[test]
    fn test_schemas_carry_titles() {
        assert_eq!(ethical_schema()["title"], "EthicalDmaResult");
        assert_eq!(common_sense_schema()["title"], "CsDmaResult");
        assert_eq!(domain_schema()["title"], "DsDmaResult");
        assert_eq!(action_selection_schema()["title"], "ActionSelectionResult");
    }
}
