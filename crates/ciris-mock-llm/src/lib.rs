// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # CIRIS Mock LLM
//!
//! A deterministic stand-in for a structured LLM provider. Responses are
//! keyed on the response schema's `title` and recognisable prompt
//! content, so the full cognitive pipeline - wakeup ritual included -
//! runs offline and repeatably.
//!
//! ## Steering responses
//!
//! Thought content may carry `$`-commands that force the action
//! selection: `$speak <text>`, `$ponder`, `$defer`, `$reject`,
//! `$task_complete`. Without a command, the mock speaks an affirmation
//! for wakeup-style prompts, completes tasks when a follow-up asks
//! whether the task is done, and otherwise echoes the thought.

mod responses;

pub use responses::entropy_score;

use async_trait::async_trait;
use ciris::errors::Result;
use ciris::services::traits::{ChatMessage, LlmService, ResourceUsage};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Deterministic mock implementation of [`LlmService`].
#[derive(Default)]
pub struct MockLlm {
    calls: AtomicU64,
}

impl MockLlm {
    /// A fresh mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of structured calls served.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn usage(messages: &[ChatMessage], response: &Value) -> ResourceUsage {
        let prompt_chars: usize = messages.iter().map(|message| message.content.len()).sum();
        ResourceUsage {
            prompt_tokens: (prompt_chars / 4) as u32,
            completion_tokens: (response.to_string().len() / 4) as u32,
            model: "mock-model".to_string(),
        }
    }
}

#[async_trait]
impl LlmService for MockLlm {
    async fn call_structured(
        &self,
        messages: &[ChatMessage],
        response_schema: &Value,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<(Value, ResourceUsage)> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let title = response_schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("");
        let response = responses::create_response(title, messages);
        debug!(schema = title, "mock llm response generated");
        let usage = Self::usage(messages, &response);
        Ok((response, usage))
    }
}
