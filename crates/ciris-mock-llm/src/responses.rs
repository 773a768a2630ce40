// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Canned response generation, keyed on schema title and prompt content.

use ciris::services::traits::ChatMessage;
use serde_json::{json, Value};

/// Deterministic chaos estimate for a piece of text: the density of
/// "noise" characters, scaled. Plain prose lands well under 0.4; strings
/// of symbols and shouting land near 1.0.
pub fn entropy_score(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count().max(1);
    let noise = text
        .chars()
        .filter(|c| "$#@!?%^&*~`".contains(*c))
        .count();
    ((noise as f64 / total as f64) * 3.0).clamp(0.02, 1.0)
}

fn coherence_score(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    if ["worthless", "bypass", "2-fa", "hack into"]
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        0.1
    } else {
        0.95
    }
}

fn user_content(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|message| matches!(message.role, ciris::services::traits::ChatRole::User))
        .map_or("", |message| message.content.as_str())
}

/// Text under assessment: everything after the first prompt marker line.
fn assessed_text(content: &str) -> &str {
    content
        .split_once(":\n")
        .map_or(content, |(_prefix, rest)| rest)
}

/// The affirmation prefix a wakeup step asks for ("starting with X - ").
fn affirmation_prefix(content: &str) -> Option<&str> {
    let after = content
        .split_once("starting with ")
        .or_else(|| content.split_once("Start your response with "))?
        .1;
    let prefix = after.split(" -").next()?.trim();
    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

fn forced_action(content: &str) -> Option<Value> {
    for line in content.lines() {
        let line = line.trim();
        if let Some(text) = line.strip_prefix("$speak ") {
            return Some(json!({
                "action": "speak",
                "parameters": {"content": text},
                "rationale": "forced by $speak"
            }));
        }
        if line.starts_with("$ponder") {
            return Some(json!({
                "action": "ponder",
                "parameters": {"questions": ["What else should be considered?"]},
                "rationale": "forced by $ponder"
            }));
        }
        if let Some(reason) = line.strip_prefix("$defer") {
            return Some(json!({
                "action": "defer",
                "parameters": {"reason": reason.trim()},
                "rationale": "forced by $defer"
            }));
        }
        if let Some(reason) = line.strip_prefix("$reject") {
            return Some(json!({
                "action": "reject",
                "parameters": {"reason": reason.trim()},
                "rationale": "forced by $reject"
            }));
        }
        if line.starts_with("$task_complete") {
            return Some(json!({
                "action": "task_complete",
                "parameters": {},
                "rationale": "forced by $task_complete"
            }));
        }
    }
    None
}

fn select_action(content: &str) -> Value {
    if let Some(forced) = forced_action(content) {
        return forced;
    }

    // A follow-up asking whether the spoken step finished the task.
    if content.contains("select task_complete") {
        return json!({
            "action": "task_complete",
            "parameters": {},
            "rationale": "the spoken reply completed the task"
        });
    }

    // Wakeup affirmations: answer with the requested prefix.
    if let Some(prefix) = affirmation_prefix(content) {
        return json!({
            "action": "speak",
            "parameters": {"content": format!("{prefix} - I affirm this and continue my ritual.")},
            "rationale": "identity affirmation requested"
        });
    }

    let preview: String = content.chars().take(120).collect();
    json!({
        "action": "speak",
        "parameters": {"content": format!("I considered: {preview}")},
        "rationale": "default echo response"
    })
}

/// Build the canned response for a schema title.
pub(crate) fn create_response(title: &str, messages: &[ChatMessage]) -> Value {
    let content = user_content(messages);
    match title {
        "EntropyResult" => json!({"entropy": entropy_score(assessed_text(content))}),
        "CoherenceResult" => json!({"coherence": coherence_score(assessed_text(content))}),
        "OptimizationVetoResult" => json!({
            "decision": "proceed",
            "entropy_reduction_ratio": 0.1,
            "affected_values": [],
            "confidence": 0.9,
            "justification": "no optimization concern detected"
        }),
        "EpistemicHumilityResult" => json!({
            "epistemic_certainty": "moderate",
            "identified_uncertainties": [],
            "reflective_justification": "no clear issue visible from here",
            "recommended_action": "proceed"
        }),
        "EthicalDmaResult" => json!({
            "alignment": {"respect": "the thought serves its channel"},
            "decision": "proceed",
            "reasoning": "no ethical conflict detected"
        }),
        "CsDmaResult" => json!({
            "plausibility": 0.9,
            "flags": [],
            "reasoning": "plausible in context"
        }),
        "DsDmaResult" => json!({
            "domain": "general",
            "alignment": 0.9,
            "flags": [],
            "reasoning": "consistent with domain practice"
        }),
        "ActionSelectionResult" => select_action(content),
        _ => json!({}),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_score_bounds() {
        assert!(entropy_score("") >= 0.02);
        assert!(entropy_score("plain text with words") < 0.1);
        assert!(entropy_score("$$$$!!!!????") > 0.9);
    }

    #[test]
    fn test_affirmation_prefix_extraction() {
        let content = "If you agree, speak in the affirmative, starting with RESILIENCE - ";
        assert_eq!(affirmation_prefix(content), Some("RESILIENCE"));
        assert_eq!(affirmation_prefix("no marker here"), None);
    }

    #[test]
    fn test_assessed_text_strips_marker() {
        assert_eq!(
            assessed_text("REPLY TO ASSESS FOR ENTROPY:\nactual text"),
            "actual text"
        );
        assert_eq!(assessed_text("no marker"), "no marker");
    }

    #[test]
    fn test_forced_action_parsing() {
        assert_eq!(forced_action("$speak hi").unwrap()["action"], "speak");
        assert_eq!(
            forced_action("some intro\n$defer too risky").unwrap()["parameters"]["reason"],
            "too risky"
        );
        assert!(forced_action("nothing forced").is_none());
    }
}
