//! Append-only run history backed by SQLite.
//!
//! Every progress report becomes one immutable row in `runs`. Node records
//! are mirrored into `nodes` so the dashboard can show names and addresses
//! and the registry can be rebuilt after a coordinator restart.
//!
//! The connection sits behind a mutex; callers on the async runtime should
//! go through `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::nodes::NodeRecord;
use crate::error::{FleetError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    node_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT,
    status TEXT NOT NULL,
    last_seen TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id TEXT NOT NULL,
    worker INTEGER,               -- NULL for node-level reports
    output_file TEXT,
    games INTEGER NOT NULL DEFAULT 0,
    positions INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL       -- RFC 3339, UTC, microseconds
);
CREATE INDEX IF NOT EXISTS idx_runs_reporter ON runs(node_id, worker, timestamp);
CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs(timestamp);
"#;

/// Latest row per reporter, where a reporter is a node plus worker slot.
///
/// Node-level rows (no worker) only show up for nodes that have never
/// reported from a worker; otherwise the node's status lives on its
/// registry record.
const LATEST_RUNS: &str = r#"
SELECT r.id, r.node_id, r.worker, r.output_file, r.games, r.positions,
       r.status, r.timestamp, n.name, n.address
FROM runs r
LEFT JOIN nodes n ON n.node_id = r.node_id
WHERE r.id = (
    SELECT r2.id FROM runs r2
    WHERE r2.node_id = r.node_id AND r2.worker IS r.worker
    ORDER BY r2.timestamp DESC, r2.id DESC
    LIMIT 1
)
AND (
    r.worker IS NOT NULL
    OR NOT EXISTS (
        SELECT 1 FROM runs r3
        WHERE r3.node_id = r.node_id AND r3.worker IS NOT NULL
    )
)
ORDER BY r.timestamp DESC, r.id DESC
LIMIT ?1
"#;

/// A progress report about to be recorded.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub node_id: String,
    pub worker: Option<u32>,
    pub output_file: Option<String>,
    pub games: u64,
    pub positions: u64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// One recorded progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub node_id: String,
    pub worker: Option<u32>,
    pub output_file: Option<String>,
    pub games: u64,
    pub positions: u64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// A latest-runs row joined with the reporting node's metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRun {
    #[serde(flatten)]
    pub run: RunRecord,
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Sums over a latest-runs view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub reporters: usize,
    pub games: u64,
    pub positions: u64,
}

impl RunTotals {
    pub fn from_latest(runs: &[LatestRun]) -> Self {
        runs.iter().fold(
            Self {
                reporters: runs.len(),
                ..Self::default()
            },
            |acc, r| Self {
                games: acc.games.saturating_add(r.run.games),
                positions: acc.positions.saturating_add(r.run.positions),
                ..acc
            },
        )
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let timestamp: String = row.get(7)?;
    Ok(RunRecord {
        id: row.get(0)?,
        node_id: row.get(1)?,
        worker: row.get(2)?,
        output_file: row.get(3)?,
        games: row.get::<_, i64>(4)?.max(0) as u64,
        positions: row.get::<_, i64>(5)?.max(0) as u64,
        status: row.get(6)?,
        timestamp: parse_timestamp(&timestamp)?,
    })
}

/// Handle to the run-history database. Cheap to clone.
#[derive(Clone)]
pub struct RunHistory {
    conn: Arc<Mutex<Connection>>,
}

impl RunHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FleetError::Internal("run history lock poisoned".to_string()))
    }

    /// Insert or refresh a node's metadata.
    pub fn upsert_node(&self, node: &NodeRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nodes (node_id, name, address, status, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(node_id) DO UPDATE SET
                name = excluded.name,
                address = excluded.address,
                status = excluded.status,
                last_seen = excluded.last_seen",
            params![
                node.id.to_string(),
                node.name,
                node.address,
                node.status,
                format_timestamp(&node.last_seen),
            ],
        )?;
        Ok(())
    }

    /// All persisted node records. Rows with unparseable identities are skipped.
    pub fn load_nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT node_id, name, address, status, last_seen FROM nodes")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let last_seen: String = row.get(4)?;
            Ok((
                id,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                parse_timestamp(&last_seen)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, name, address, status, last_seen) = row?;
            match Uuid::parse_str(&id) {
                Ok(id) => nodes.push(NodeRecord {
                    id,
                    name,
                    address,
                    last_seen,
                    status,
                }),
                Err(e) => tracing::warn!(node_id = %id, error = %e, "Skipping node with invalid id"),
            }
        }
        Ok(nodes)
    }

    /// Append one run record.
    pub fn append(&self, run: &NewRun) -> Result<RunRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs (node_id, worker, output_file, games, positions, status, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.node_id,
                run.worker,
                run.output_file,
                i64::try_from(run.games).unwrap_or(i64::MAX),
                i64::try_from(run.positions).unwrap_or(i64::MAX),
                run.status,
                format_timestamp(&run.timestamp),
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, node_id = %run.node_id, worker = ?run.worker, status = %run.status, "Run recorded");

        Ok(RunRecord {
            id,
            node_id: run.node_id.clone(),
            worker: run.worker,
            output_file: run.output_file.clone(),
            games: run.games,
            positions: run.positions,
            status: run.status.clone(),
            timestamp: run.timestamp,
        })
    }

    /// The most recent run of every reporter, newest first, at most `limit` rows.
    pub fn latest_runs(&self, limit: usize) -> Result<Vec<LatestRun>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(LATEST_RUNS)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(LatestRun {
                run: run_from_row(row)?,
                name: row.get(8)?,
                address: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Full history for one node, newest first.
    pub fn runs_for_node(&self, node_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, node_id, worker, output_file, games, positions, status, timestamp
             FROM runs WHERE node_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![node_id, limit], run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn run_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: Option<i64> = conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .optional()?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }
}
