// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Incident capture: a `tracing` layer that promotes WARN+ events into
//! graph incidents.
//!
//! Each qualifying event is (a) appended to a rotating incident log file
//! with a stable `incidents_latest` symlink, and (b) sent over a channel
//! to an [`IncidentWriter`] that persists the [`IncidentNode`]
//! asynchronously - the logging hot path never touches the graph store.
//!
//! Structured fields named in [`LogContext`] are copied onto the
//! incident when present on the event.

use crate::graph::TypedNode;
use crate::incidents::node::{IncidentNode, IncidentSeverity, IncidentStatus};
use crate::services::time::TimeSource;
use crate::services::traits::MemoryService;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use uuid::Uuid;

/// Structured fields the capture layer lifts off log events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    /// `correlation_id` field
    pub correlation_id: Option<String>,
    /// `task_id` field
    pub task_id: Option<String>,
    /// `thought_id` field
    pub thought_id: Option<String>,
    /// `handler_name` (or `handler`) field
    pub handler_name: Option<String>,
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    context: LogContext,
    exception_type: Option<String>,
    stack_trace: Option<String>,
    critical: bool,
}

impl EventVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "correlation_id" => self.context.correlation_id = Some(value),
            "task_id" => self.context.task_id = Some(value),
            "thought_id" => self.context.thought_id = Some(value),
            "handler_name" | "handler" => self.context.handler_name = Some(value),
            "exception_type" => self.exception_type = Some(value),
            "stack_trace" => self.stack_trace = Some(value),
            _ => {}
        }
    }
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "critical" {
            self.critical = value;
        } else {
            self.record_field(field, value.to_string());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }
}

/// Tracing layer that captures WARN+ events as incidents.
pub struct IncidentCaptureLayer {
    file: Mutex<File>,
    log_path: PathBuf,
    tx: mpsc::UnboundedSender<IncidentNode>,
    clock: Arc<dyn TimeSource>,
}

impl IncidentCaptureLayer {
    /// Create the layer. Opens a timestamped incident log under
    /// `log_dir`, refreshes the `<prefix>_latest` symlink, and returns
    /// the receiver half for an [`IncidentWriter`].
    pub fn new(
        log_dir: impl AsRef<Path>,
        filename_prefix: &str,
        clock: Arc<dyn TimeSource>,
    ) -> crate::errors::Result<(Self, mpsc::UnboundedReceiver<IncidentNode>)> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir)?;

        let stamp = clock.now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{filename_prefix}_{stamp}.log"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        writeln!(
            file,
            "=== Incident log started at {} ===",
            clock.now_iso()
        )?;

        let latest = log_dir.join(format!("{filename_prefix}_latest.log"));
        let _ = std::fs::remove_file(&latest);
        #[cfg(unix)]
        {
            // Symlink refresh is best effort; some filesystems refuse.
            let _ = std::os::unix::fs::symlink(&log_path, &latest);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                file: Mutex::new(file),
                log_path,
                tx,
                clock,
            },
            rx,
        ))
    }

    /// Path of the current incident log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn severity_for(level: &Level, critical: bool) -> (IncidentSeverity, &'static str) {
        if critical {
            return (IncidentSeverity::Critical, "CRITICAL");
        }
        if *level == Level::ERROR {
            (IncidentSeverity::High, "ERROR")
        } else {
            (IncidentSeverity::Medium, "WARNING")
        }
    }
}

impl<S: Subscriber> Layer<S> for IncidentCaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::WARN {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let (severity, incident_type) = Self::severity_for(metadata.level(), visitor.critical);
        let now = self.clock.now();

        let mut line = format!(
            "{} - {incident_type:8} - {} - ",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            metadata.target(),
        );
        if let (Some(file), Some(line_number)) = (metadata.file(), metadata.line()) {
            let _ = write!(line, "{file}:{line_number} - ");
        }
        line.push_str(&visitor.message);
        {
            let mut file = self.file.lock();
            let _ = writeln!(file, "{line}");
            if severity != IncidentSeverity::Medium {
                let _ = writeln!(file, "{}", "-".repeat(80));
            }
        }

        let incident = IncidentNode {
            id: format!("incident_{}", Uuid::new_v4().simple()),
            incident_type: incident_type.to_string(),
            severity,
            status: IncidentStatus::Open,
            description: visitor.message,
            source_component: metadata.target().to_string(),
            detected_at: now,
            correlation_id: visitor.context.correlation_id,
            task_id: visitor.context.task_id,
            thought_id: visitor.context.thought_id,
            handler_name: visitor.context.handler_name,
            filename: metadata.file().map(str::to_string),
            line_number: metadata.line(),
            exception_type: visitor.exception_type,
            stack_trace: visitor.stack_trace,
            problem_id: None,
            updated_by: "incident_capture".to_string(),
            updated_at: now,
        };
        // Receiver gone means the writer stopped first; drop the incident.
        let _ = self.tx.send(incident);
    }
}

/// Drains captured incidents into the graph store.
pub struct IncidentWriter {
    handle: tokio::task::JoinHandle<u64>,
}

impl IncidentWriter {
    /// Spawn the writer task over the layer's receiver half.
    pub fn spawn(
        mut rx: mpsc::UnboundedReceiver<IncidentNode>,
        graph: Arc<dyn MemoryService>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(incident) = rx.recv().await {
                match graph.memorize(incident.to_graph_node()).await {
                    Ok(_) => written += 1,
                    Err(error) => {
                        // Incident capture must never take the system down.
                        eprintln!("incident write failed: {error}");
                    }
                }
            }
            written
        });
        Self { handle }
    }

    /// Stop the writer. Waits briefly for in-flight writes, then aborts;
    /// returns the number of incidents written when known.
    pub async fn stop(self) -> Option<u64> {
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(Duration::from_secs(2), self.handle).await {
            Ok(Ok(written)) => Some(written),
            Ok(Err(_)) => None,
            Err(_) => {
                abort.abort();
                None
            }
        }
    }
}
