// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

use thiserror::Error;

/// Error types for CIRIS core operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Service registry has no usable provider for the request
    #[error("No provider available: {0}")]
    NoProvider(String),

    /// Registry readiness wait timed out
    #[error("Service registry not ready after {0:?}")]
    NotReady(std::time::Duration),

    /// Persistence layer failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Task or thought lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid state machine transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// State the processor was in.
        from: String,
        /// State the transition targeted.
        to: String,
    },

    /// LLM provider failure
    #[error("LLM error: {0}")]
    Llm(String),

    /// A decision-making evaluator failed or timed out
    #[error("DMA failure in {stage}: {reason}")]
    DmaFailure {
        /// Evaluator that failed.
        stage: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Action handler failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Typed node reconstruction failed
    #[error("Node decode error: {0}")]
    NodeDecode(String),

    /// Communication adapter failure
    #[error("Communication error: {0}")]
    Communication(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CIRIS core operations
pub type Result<T> = std::result::Result<T, Error>;
