use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use flowloom_core::error::{FlowError, Result};

use crate::context::ExecutionContext;
use crate::executor::ExecutionResult;
use crate::graph::FlowGraph;

/// A suspended run parked until someone decides on its review.
#[derive(Debug, Clone)]
pub struct SuspendedRun {
    pub session_id: String,
    pub review_node_id: String,
    pub message: String,
    /// Graph the run was started with; resume must use the same one.
    pub graph: FlowGraph,
    pub context: ExecutionContext,
    pub created_at: DateTime<Utc>,
    /// From the review's timeout, when it has one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SuspendedRun {
    /// Capture a suspended result. Returns `None` for results that are not suspended.
    pub fn from_result(graph: &FlowGraph, result: &ExecutionResult) -> Option<Self> {
        let context = result.context.clone()?;
        let review = context.pending_review.clone()?;
        let created_at = Utc::now();
        Some(Self {
            session_id: context.session_id.to_string(),
            review_node_id: review.node_id,
            message: review.message,
            graph: graph.clone(),
            context,
            created_at,
            expires_at: review
                .timeout_seconds
                .filter(|s| *s > 0)
                .map(|s| created_at + Duration::seconds(s as i64)),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Listing row for pending reviews.
#[derive(Debug, Clone)]
pub struct SuspendedSummary {
    pub session_id: String,
    pub review_node_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Persistent store for suspended runs, keyed by session id, backed by SQLite.
pub struct SuspensionStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> FlowError {
    FlowError::Database(format!("{}: {}", context, e))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| db_err(&format!("Corrupt timestamp {:?}", s), e))
}

fn parse_expiry(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

impl SuspensionStore {
    /// Open or create the suspension database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn =
            Connection::open(path).map_err(|e| db_err("Failed to open suspension store", e))?;
        Self::init(conn)
    }

    /// In-memory store, mostly for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| db_err("Failed to open in-memory store", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS suspended_runs (
                 session_id TEXT PRIMARY KEY,
                 review_node_id TEXT NOT NULL,
                 message TEXT NOT NULL,
                 graph_json TEXT NOT NULL,
                 context_json TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 expires_at TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_suspended_expiry
                 ON suspended_runs(expires_at);",
        )
        .map_err(|e| db_err("Failed to initialize suspension schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| db_err("Suspension store lock poisoned", e))
    }

    /// Save a suspended run, replacing any earlier one for the session.
    pub fn save(&self, run: &SuspendedRun) -> Result<()> {
        let graph_json = serde_json::to_string(&run.graph)?;
        let context_json = serde_json::to_string(&run.context)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO suspended_runs
                 (session_id, review_node_id, message, graph_json, context_json,
                  created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.session_id,
                run.review_node_id,
                run.message,
                graph_json,
                context_json,
                run.created_at.to_rfc3339(),
                run.expires_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| db_err("Failed to save suspended run", e))?;
        Ok(())
    }

    /// Load the suspended run for a session.
    pub fn load(&self, session_id: &str) -> Result<Option<SuspendedRun>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT session_id, review_node_id, message, graph_json, context_json,
                        created_at, expires_at
                 FROM suspended_runs WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err("Failed to load suspended run", e))?;

        let Some((session_id, review_node_id, message, graph, context, created, expires)) = row
        else {
            return Ok(None);
        };

        Ok(Some(SuspendedRun {
            session_id,
            review_node_id,
            message,
            graph: serde_json::from_str(&graph)?,
            context: serde_json::from_str(&context)?,
            created_at: parse_ts(&created)?,
            expires_at: parse_expiry(expires.as_deref())?,
        }))
    }

    /// All suspended runs, oldest first.
    pub fn list(&self) -> Result<Vec<SuspendedSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, review_node_id, message, created_at, expires_at
                 FROM suspended_runs ORDER BY created_at ASC",
            )
            .map_err(|e| db_err("Failed to prepare query", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(|e| db_err("Failed to list suspended runs", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err("Failed to read suspended run", e))?;

        rows.into_iter()
            .map(|(session_id, review_node_id, message, created, expires)| {
                Ok(SuspendedSummary {
                    session_id,
                    review_node_id,
                    message,
                    created_at: parse_ts(&created)?,
                    expires_at: parse_expiry(expires.as_deref())?,
                })
            })
            .collect()
    }

    /// Remove a session's suspended run. Returns whether one existed.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn
            .execute("DELETE FROM suspended_runs WHERE session_id = ?1", params![session_id])
            .map_err(|e| db_err("Failed to delete suspended run", e))?;
        Ok(deleted > 0)
    }

    /// Remove and return every run whose review timed out before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<SuspendedRun>> {
        let expired: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|s| s.expires_at.is_some_and(|t| t <= now))
            .map(|s| s.session_id)
            .collect();

        let mut runs = Vec::with_capacity(expired.len());
        for session_id in expired {
            if let Some(run) = self.load(&session_id)? {
                self.delete(&session_id)?;
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PendingReview;
    use crate::graph::{Edge, Node};
    use flowloom_core::types::SessionId;
    use serde_json::json;

    fn run(session: &str, timeout: Option<u64>) -> SuspendedRun {
        let mut context = ExecutionContext::new(SessionId::from_str(session), json!("in"));
        context.record_output("a", json!("in"));
        context.pending_review = Some(PendingReview {
            node_id: "b".into(),
            output: json!("draft"),
            message: "check".into(),
            allow_edit: true,
            timeout_seconds: timeout,
        });
        let created_at = Utc::now();
        SuspendedRun {
            session_id: session.into(),
            review_node_id: "b".into(),
            message: "check".into(),
            graph: FlowGraph::new(
                vec![Node::new("a", "start"), Node::new("b", "humanReview")],
                vec![Edge::new("a", "b")],
            ),
            context,
            created_at,
            expires_at: timeout.map(|s| created_at + Duration::seconds(s as i64)),
        }
    }

    #[test]
    fn test_save_and_load() {
        let store = SuspensionStore::in_memory().unwrap();
        store.save(&run("s1", None)).unwrap();

        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.review_node_id, "b");
        assert_eq!(loaded.graph.nodes.len(), 2);
        assert_eq!(loaded.context.node_outputs["a"], json!("in"));
        assert_eq!(loaded.context.pending_review.unwrap().output, json!("draft"));
        assert!(loaded.expires_at.is_none());
    }

    #[test]
    fn test_save_replaces_same_session() {
        let store = SuspensionStore::in_memory().unwrap();
        store.save(&run("s1", None)).unwrap();
        let mut second = run("s1", None);
        second.message = "again".into();
        store.save(&second).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].message, "again");
    }

    #[test]
    fn test_corrupt_expiry_is_an_error_not_expired() {
        let store = SuspensionStore::in_memory().unwrap();
        store.save(&run("bad", Some(60))).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE suspended_runs SET expires_at = 'soon' WHERE session_id = 'bad'", [])
            .unwrap();

        assert!(matches!(store.load("bad"), Err(FlowError::Database(_))));
        assert!(matches!(store.sweep_expired(Utc::now()), Err(FlowError::Database(_))));
        // Still there for someone to repair
        let count: i64 = store
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM suspended_runs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_delete() {
        let store = SuspensionStore::in_memory().unwrap();
        store.save(&run("s-del", None)).unwrap();
        assert!(store.delete("s-del").unwrap());
        assert!(!store.delete("s-del").unwrap());
        assert!(store.load("s-del").unwrap().is_none());
    }

    #[test]
    fn test_sweep_expired() {
        let store = SuspensionStore::in_memory().unwrap();
        store.save(&run("short", Some(10))).unwrap();
        store.save(&run("long", Some(3600))).unwrap();
        store.save(&run("forever", None)).unwrap();

        let later = Utc::now() + Duration::seconds(60);
        let swept = store.sweep_expired(later).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].session_id, "short");
        assert!(swept[0].is_expired(later));

        let remaining: Vec<_> = store.list().unwrap().into_iter().map(|s| s.session_id).collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&"short".to_string()));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("suspended.db");
        {
            let store = SuspensionStore::open(&path).unwrap();
            store.save(&run("disk", None)).unwrap();
        }
        let reopened = SuspensionStore::open(&path).unwrap();
        assert!(reopened.load("disk").unwrap().is_some());
    }
}
