// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Incident Capture & Analysis
//!
//! ITIL-style chain from captured error to actionable self-improvement:
//! WARNING/ERROR log events become [`IncidentNode`]s; the dream cycle
//! mines them for patterns, promotes recurring ones to [`ProblemNode`]s,
//! and summarises each analysis in an [`InsightNode`].

pub mod analyzer;
pub mod capture;
pub mod node;

pub use analyzer::IncidentAnalyzer;
pub use capture::{IncidentCaptureLayer, IncidentWriter, LogContext};
pub use node::{IncidentNode, IncidentSeverity, IncidentStatus, InsightNode, ProblemNode};
