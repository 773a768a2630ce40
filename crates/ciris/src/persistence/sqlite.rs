// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # SQLite Store
//!
//! Durable single-node persistence for tasks, thoughts, graph nodes, and
//! correlations over one embedded database.
//!
//! ## Safety & Concurrency
//!
//! `rusqlite::Connection` is not `Send`/`Sync`. All SQLite I/O runs on a
//! dedicated blocking worker thread that owns the connection; async callers
//! hand it jobs over an mpsc channel and await a oneshot response. Jobs are
//! processed serially, which also gives the write-serialization the graph
//! store contract requires.

use super::TaskStore;
use crate::correlations::{
    Correlation, CorrelationStatus, CorrelationStore, CorrelationType, ResponseData,
};
use crate::errors::{Error, Result};
use crate::graph::{GraphNode, GraphScope};
use crate::services::time::TimeSource;
use crate::services::traits::{MemoryQuery, MemoryService};
use crate::tasks::{Task, TaskStatus, Thought, ThoughtStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type DbJob = Box<dyn FnOnce(&Connection) + Send>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    task_id    TEXT PRIMARY KEY,
    status     TEXT NOT NULL,
    priority   INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    data       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

CREATE TABLE IF NOT EXISTS thoughts (
    thought_id     TEXT PRIMARY KEY,
    source_task_id TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    data           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_thoughts_status ON thoughts(status);
CREATE INDEX IF NOT EXISTS idx_thoughts_task ON thoughts(source_task_id);

CREATE TABLE IF NOT EXISTS nodes (
    id        TEXT NOT NULL,
    scope     TEXT NOT NULL,
    node_type TEXT NOT NULL,
    data      TEXT NOT NULL,
    PRIMARY KEY (id, scope)
);
CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);

CREATE TABLE IF NOT EXISTS correlations (
    correlation_id   TEXT PRIMARY KEY,
    correlation_type TEXT NOT NULL,
    status           TEXT NOT NULL,
    data             TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_correlations_type ON correlations(correlation_type);
"#;

fn db_err(error: rusqlite::Error) -> Error {
    Error::Persistence(error.to_string())
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "PENDING",
        TaskStatus::Active => "ACTIVE",
        TaskStatus::Completed => "COMPLETED",
        TaskStatus::Failed => "FAILED",
        TaskStatus::Deferred => "DEFERRED",
    }
}

fn thought_status_str(status: ThoughtStatus) -> &'static str {
    match status {
        ThoughtStatus::Pending => "PENDING",
        ThoughtStatus::Processing => "PROCESSING",
        ThoughtStatus::Completed => "COMPLETED",
        ThoughtStatus::Failed => "FAILED",
    }
}

fn correlation_type_str(correlation_type: CorrelationType) -> &'static str {
    match correlation_type {
        CorrelationType::ServiceInteraction => "SERVICE_INTERACTION",
        CorrelationType::TraceSpan => "TRACE_SPAN",
        CorrelationType::Metric => "METRIC",
        CorrelationType::Log => "LOG",
    }
}

fn correlation_status_str(status: CorrelationStatus) -> &'static str {
    match status {
        CorrelationStatus::Pending => "PENDING",
        CorrelationStatus::Completed => "COMPLETED",
        CorrelationStatus::Failed => "FAILED",
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn collect_rows<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    query_params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(query_params, |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(decode(&row.map_err(db_err)?)?);
    }
    Ok(out)
}

/// SQLite-backed implementation of [`TaskStore`], [`CorrelationStore`],
/// and [`MemoryService`].
pub struct SqliteStore {
    tx: mpsc::Sender<DbJob>,
    clock: Arc<dyn TimeSource>,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn TimeSource>) -> Result<Self> {
        Self::start(Some(path.into()), clock).await
    }

    /// Open a process-private in-memory database. State is lost on drop.
    pub async fn open_in_memory(clock: Arc<dyn TimeSource>) -> Result<Self> {
        warn!("SQLite store using in-memory storage - state will be lost on restart");
        Self::start(None, clock).await
    }

    async fn start(path: Option<PathBuf>, clock: Arc<dyn TimeSource>) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<DbJob>(128);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let opened = match path {
                Some(ref p) => Connection::open(p).map_err(db_err).and_then(|conn| {
                    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                        .map_err(db_err)?;
                    Ok(conn)
                }),
                None => Connection::open_in_memory().map_err(db_err),
            };

            let conn = match opened {
                Ok(conn) => conn,
                Err(error) => {
                    let _ = ready_tx.send(Err(error));
                    return;
                }
            };

            if let Err(error) = conn.execute_batch(SCHEMA).map_err(db_err) {
                let _ = ready_tx.send(Err(error));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            while let Some(job) = rx.blocking_recv() {
                job(&conn);
            }
        });

        ready_rx
            .await
            .map_err(|_| Error::Persistence("sqlite worker exited during startup".to_string()))??;

        Ok(Self { tx, clock })
    }

    async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let (resp_tx, resp_rx) = oneshot::channel::<Result<T>>();
        let boxed: DbJob = Box::new(move |conn| {
            let _ = resp_tx.send(job(conn));
        });
        self.tx
            .send(boxed)
            .await
            .map_err(|_| Error::Persistence("sqlite store closed".to_string()))?;
        resp_rx
            .await
            .map_err(|_| Error::Persistence("sqlite worker dropped response".to_string()))?
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert_task(&self, task: Task) -> Result<()> {
        self.run(move |conn| {
            let data = encode(&task)?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO tasks (task_id, status, priority, created_at, data)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        task.task_id,
                        task_status_str(task.status),
                        task.priority,
                        task.created_at.to_rfc3339(),
                        data
                    ],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(Error::Persistence(format!(
                    "task {} already exists",
                    task.task_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let task_id = task_id.to_string();
        self.run(move |conn| {
            match conn.query_row(
                "SELECT data FROM tasks WHERE task_id = ?",
                [&task_id],
                |row| row.get::<_, String>(0),
            ) {
                Ok(raw) => Ok(Some(decode(&raw)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(error) => Err(db_err(error)),
            }
        })
        .await
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let task_id = task_id.to_string();
        let now = self.now();
        self.run(move |conn| {
            let raw: String = conn
                .query_row(
                    "SELECT data FROM tasks WHERE task_id = ?",
                    [&task_id],
                    |row| row.get(0),
                )
                .map_err(|error| match error {
                    rusqlite::Error::QueryReturnedNoRows => Error::NotFound(format!("task {task_id}")),
                    other => db_err(other),
                })?;
            let mut task: Task = decode(&raw)?;
            task.status = status;
            task.updated_at = now;
            conn.execute(
                "UPDATE tasks SET status = ?, data = ? WHERE task_id = ?",
                params![task_status_str(status), encode(&task)?, task_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.run(move |conn| {
            collect_rows(
                conn,
                "SELECT data FROM tasks WHERE status = ?
                 ORDER BY priority DESC, created_at ASC, task_id ASC",
                &[&task_status_str(status)],
            )
        })
        .await
    }

    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<usize> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM tasks WHERE status = ?",
                    [task_status_str(status)],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(count as usize)
        })
        .await
    }

    async fn insert_thought(&self, thought: Thought) -> Result<()> {
        self.run(move |conn| {
            let data = encode(&thought)?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO thoughts
                     (thought_id, source_task_id, status, created_at, data)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        thought.thought_id,
                        thought.source_task_id,
                        thought_status_str(thought.status),
                        thought.created_at.to_rfc3339(),
                        data
                    ],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(Error::Persistence(format!(
                    "thought {} already exists",
                    thought.thought_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_thought(&self, thought_id: &str) -> Result<Option<Thought>> {
        let thought_id = thought_id.to_string();
        self.run(move |conn| {
            match conn.query_row(
                "SELECT data FROM thoughts WHERE thought_id = ?",
                [&thought_id],
                |row| row.get::<_, String>(0),
            ) {
                Ok(raw) => Ok(Some(decode(&raw)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(error) => Err(db_err(error)),
            }
        })
        .await
    }

    async fn thoughts_by_ids(&self, thought_ids: &[String]) -> Result<HashMap<String, Thought>> {
        let ids = thought_ids.to_vec();
        self.run(move |conn| {
            let mut found = HashMap::new();
            let mut stmt = conn
                .prepare("SELECT data FROM thoughts WHERE thought_id = ?")
                .map_err(db_err)?;
            for id in ids {
                match stmt.query_row([&id], |row| row.get::<_, String>(0)) {
                    Ok(raw) => {
                        found.insert(id, decode::<Thought>(&raw)?);
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => {}
                    Err(error) => return Err(db_err(error)),
                }
            }
            Ok(found)
        })
        .await
    }

    async fn update_thought_status(
        &self,
        thought_id: &str,
        status: ThoughtStatus,
        final_action: Option<Value>,
    ) -> Result<()> {
        let thought_id = thought_id.to_string();
        let now = self.now();
        self.run(move |conn| {
            let raw: String = conn
                .query_row(
                    "SELECT data FROM thoughts WHERE thought_id = ?",
                    [&thought_id],
                    |row| row.get(0),
                )
                .map_err(|error| match error {
                    rusqlite::Error::QueryReturnedNoRows => {
                        Error::NotFound(format!("thought {thought_id}"))
                    }
                    other => db_err(other),
                })?;
            let mut thought: Thought = decode(&raw)?;
            thought.status = status;
            if final_action.is_some() {
                thought.final_action = final_action;
            }
            thought.updated_at = now;
            conn.execute(
                "UPDATE thoughts SET status = ?, data = ? WHERE thought_id = ?",
                params![thought_status_str(status), encode(&thought)?, thought_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn thoughts_for_task(&self, task_id: &str) -> Result<Vec<Thought>> {
        let task_id = task_id.to_string();
        self.run(move |conn| {
            collect_rows(
                conn,
                "SELECT data FROM thoughts WHERE source_task_id = ?
                 ORDER BY created_at ASC, thought_id ASC",
                &[&task_id],
            )
        })
        .await
    }

    async fn pending_thoughts_for_active_tasks(&self, limit: usize) -> Result<Vec<Thought>> {
        self.run(move |conn| {
            collect_rows(
                conn,
                "SELECT t.data FROM thoughts t
                 JOIN tasks k ON t.source_task_id = k.task_id
                 WHERE t.status = 'PENDING' AND k.status = 'ACTIVE'
                 ORDER BY t.created_at ASC, t.thought_id ASC
                 LIMIT ?",
                &[&(limit as i64)],
            )
        })
        .await
    }

    async fn count_thoughts_by_status(&self, status: ThoughtStatus) -> Result<usize> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM thoughts WHERE status = ?",
                    [thought_status_str(status)],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(count as usize)
        })
        .await
    }

    async fn recent_thoughts(&self, limit: usize) -> Result<Vec<Thought>> {
        self.run(move |conn| {
            collect_rows(
                conn,
                "SELECT data FROM thoughts ORDER BY rowid DESC LIMIT ?",
                &[&(limit as i64)],
            )
        })
        .await
    }
}

#[async_trait]
impl CorrelationStore for SqliteStore {
    async fn add(&self, correlation: Correlation) -> Result<()> {
        self.run(move |conn| {
            let data = encode(&correlation)?;
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO correlations
                     (correlation_id, correlation_type, status, data)
                     VALUES (?, ?, ?, ?)",
                    params![
                        correlation.correlation_id,
                        correlation_type_str(correlation.correlation_type),
                        correlation_status_str(correlation.status),
                        data
                    ],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(Error::Persistence(format!(
                    "correlation {} already exists",
                    correlation.correlation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn update_response(
        &self,
        correlation_id: &str,
        response: ResponseData,
        status: CorrelationStatus,
    ) -> Result<()> {
        let correlation_id = correlation_id.to_string();
        let now = self.now();
        self.run(move |conn| {
            let raw: String = conn
                .query_row(
                    "SELECT data FROM correlations WHERE correlation_id = ?",
                    [&correlation_id],
                    |row| row.get(0),
                )
                .map_err(|error| match error {
                    rusqlite::Error::QueryReturnedNoRows => {
                        Error::NotFound(format!("correlation {correlation_id}"))
                    }
                    other => db_err(other),
                })?;
            let mut correlation: Correlation = decode(&raw)?;
            correlation.response = Some(response);
            correlation.status = status;
            correlation.updated_at = now;
            conn.execute(
                "UPDATE correlations SET status = ?, data = ? WHERE correlation_id = ?",
                params![
                    correlation_status_str(status),
                    encode(&correlation)?,
                    correlation_id
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, correlation_id: &str) -> Result<Option<Correlation>> {
        let correlation_id = correlation_id.to_string();
        self.run(move |conn| {
            match conn.query_row(
                "SELECT data FROM correlations WHERE correlation_id = ?",
                [&correlation_id],
                |row| row.get::<_, String>(0),
            ) {
                Ok(raw) => Ok(Some(decode(&raw)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(error) => Err(db_err(error)),
            }
        })
        .await
    }

    async fn by_type(&self, correlation_type: CorrelationType) -> Result<Vec<Correlation>> {
        self.run(move |conn| {
            collect_rows(
                conn,
                "SELECT data FROM correlations WHERE correlation_type = ? ORDER BY rowid ASC",
                &[&correlation_type_str(correlation_type)],
            )
        })
        .await
    }

    async fn pending_count(&self) -> Result<usize> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM correlations WHERE status = 'PENDING'",
                    [],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl MemoryService for SqliteStore {
    async fn memorize(&self, mut node: GraphNode) -> Result<String> {
        if let Some(reserved) = node.has_reserved_attribute() {
            return Err(Error::Persistence(format!(
                "node {} attribute shadows reserved key '{reserved}'",
                node.id
            )));
        }
        if node.version == 0 {
            node.version = 1;
        }
        if node.updated_by.is_empty() {
            warn!(node_id = %node.id, "memorize with empty updated_by, recording as unknown");
            node.updated_by = "unknown".to_string();
        }
        node.updated_at = self.now();

        let id = node.id.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO nodes (id, scope, node_type, data) VALUES (?, ?, ?, ?)",
                params![node.id, node.scope.as_str(), node.node_type, encode(&node)?],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await?;
        Ok(id)
    }

    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<GraphNode>> {
        let query = query.clone();
        self.run(move |conn| {
            let scope = query.scope.map(|scope| scope.as_str().to_string());
            match query.node_id.strip_suffix('*') {
                Some(prefix) => {
                    let prefix = prefix.to_string();
                    match scope {
                        Some(scope) => collect_rows(
                            conn,
                            "SELECT data FROM nodes WHERE id LIKE ? || '%' AND scope = ?
                             ORDER BY id ASC",
                            &[&prefix, &scope],
                        ),
                        None => collect_rows(
                            conn,
                            "SELECT data FROM nodes WHERE id LIKE ? || '%' ORDER BY id ASC",
                            &[&prefix],
                        ),
                    }
                }
                None => {
                    let id = query.node_id.clone();
                    match scope {
                        Some(scope) => collect_rows(
                            conn,
                            "SELECT data FROM nodes WHERE id = ? AND scope = ? ORDER BY id ASC",
                            &[&id, &scope],
                        ),
                        None => collect_rows(
                            conn,
                            "SELECT data FROM nodes WHERE id = ? ORDER BY id ASC",
                            &[&id],
                        ),
                    }
                }
            }
        })
        .await
    }

    async fn search(&self, query: &str) -> Result<Vec<GraphNode>> {
        let query = query.to_string();
        self.run(move |conn| {
            if let Some(node_type) = query.strip_prefix("type:") {
                let node_type = node_type.to_string();
                collect_rows(
                    conn,
                    "SELECT data FROM nodes WHERE node_type = ? ORDER BY id ASC",
                    &[&node_type],
                )
            } else {
                collect_rows(
                    conn,
                    "SELECT data FROM nodes WHERE data LIKE '%' || ? || '%' ORDER BY id ASC",
                    &[&query],
                )
            }
        })
        .await
    }

    async fn forget(&self, id: &str, scope: GraphScope) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM nodes WHERE id = ? AND scope = ?",
                params![id, scope.as_str()],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }
}
