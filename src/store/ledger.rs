//! SQLite assignment ledger.
//!
//! The ledger is the single source of truth for who owns which
//! (sample, item) pair. Uniqueness is enforced by the schema, not only by
//! the engine's in-memory check: overlapping runs race to `INSERT OR
//! IGNORE`, and whoever loses the race gets a silent conflict-skip instead
//! of an error. Each row commits independently, so a mid-batch I/O failure
//! never invalidates rows already written.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use tracing::debug;

use crate::domain::{AssignMethod, Assignment, SampleKey, SampleRow};
use crate::engine::{KeyIndex, LoadTracker};

/// Errors from the ledger storage layer.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("assignment row carries unknown method '{0}'")]
    UnknownMethod(String),

    #[error("assignment row carries unparseable timestamp '{0}'")]
    BadTimestamp(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS samples (
    sample_no    TEXT NOT NULL,
    site_name    TEXT,
    collected_at TEXT,
    kind         TEXT,
    item         TEXT NOT NULL,
    status       TEXT,
    uniq_key     TEXT NOT NULL UNIQUE,
    raw_path     TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    id           INTEGER PRIMARY KEY,
    sample_no    TEXT NOT NULL,
    item         TEXT NOT NULL,
    researcher   TEXT NOT NULL,
    assigned_at  TEXT NOT NULL,
    method       TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE (sample_no, item)
);

CREATE INDEX IF NOT EXISTS idx_assignments_researcher
    ON assignments (researcher);

CREATE TABLE IF NOT EXISTS ingest_log (
    fingerprint TEXT PRIMARY KEY,
    source_path TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);
";

/// Result of persisting one batch.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Rows this call actually inserted: the only rows downstream
    /// publishers may see.
    pub inserted: Vec<Assignment>,

    /// Rows a concurrent writer beat us to. Counted, never surfaced as a
    /// failure.
    pub conflicts: usize,
}

/// The SQLite-backed ledger. One connection, one process; cross-process
/// safety comes from SQLite's own locking plus the uniqueness constraint.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open (creating directories and schema as needed) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// In-memory ledger for tests.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Persist a batch. `INSERT OR IGNORE` against the uniqueness
    /// constraint; rows that lose a race are reported as conflicts.
    pub fn save(&mut self, assignments: &[Assignment]) -> Result<SaveReport, LedgerError> {
        let mut report = SaveReport::default();
        for a in assignments {
            let changed = self.conn.execute(
                "INSERT OR IGNORE INTO assignments (sample_no, item, researcher, assigned_at, method)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    a.sample_no,
                    a.item,
                    a.researcher,
                    a.assigned_at_str(),
                    a.method.as_str()
                ],
            )?;
            if changed == 1 {
                report.inserted.push(a.clone());
            } else {
                debug!(key = %a.key(), "Concurrent writer won, skipping");
                report.conflicts += 1;
            }
        }
        Ok(report)
    }

    /// Upsert normalized sample metadata, refreshing rows the portal
    /// re-exported. Returns the number of rows touched.
    pub fn upsert_samples(
        &mut self,
        rows: &[SampleRow],
        source_path: &str,
    ) -> Result<usize, LedgerError> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut touched = 0;
        for row in rows {
            touched += self.conn.execute(
                "INSERT INTO samples (sample_no, site_name, collected_at, kind, item, status, uniq_key, raw_path, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(uniq_key) DO UPDATE SET
                     site_name = excluded.site_name,
                     collected_at = excluded.collected_at,
                     kind = excluded.kind,
                     status = excluded.status,
                     raw_path = excluded.raw_path,
                     created_at = excluded.created_at",
                params![
                    row.sample_no,
                    row.site_name,
                    row.collected_at,
                    row.kind,
                    row.item,
                    row.status,
                    row.uniq_key(),
                    source_path,
                    now
                ],
            )?;
        }
        Ok(touched)
    }

    /// All bound keys, for the engine's dedup snapshot.
    pub fn assigned_keys(&self) -> Result<HashSet<SampleKey>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT sample_no, item FROM assignments")?;
        let keys = stmt
            .query_map([], |row| {
                Ok(SampleKey::new(
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                ))
            })?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    /// Per-researcher counts for the current local calendar day.
    pub fn today_loads(&self) -> Result<HashMap<String, u64>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT researcher, COUNT(*)
             FROM assignments
             WHERE date(assigned_at) = date('now', 'localtime')
             GROUP BY researcher",
        )?;
        let loads = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(loads)
    }

    /// Today's assignments, oldest first. Feeds status output and the
    /// folder publisher's daily manifests.
    pub fn today_assignments(&self) -> Result<Vec<Assignment>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT sample_no, item, researcher, assigned_at, method
             FROM assignments
             WHERE date(assigned_at) = date('now', 'localtime')
             ORDER BY researcher, assigned_at, id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(sample_no, item, researcher, assigned_at, method)| {
                Ok(Assignment {
                    sample_no,
                    item,
                    researcher,
                    assigned_at: parse_local(&assigned_at)?,
                    method: AssignMethod::parse(&method)
                        .ok_or(LedgerError::UnknownMethod(method))?,
                })
            })
            .collect()
    }

    /// Clear every assignment. Destructive; exists for re-seeding and
    /// reprocessing. Returns the number of rows removed.
    pub fn reset_assignments(&mut self) -> Result<usize, LedgerError> {
        Ok(self.conn.execute("DELETE FROM assignments", [])?)
    }

    /// Attach a completion timestamp to one assignment. Returns false if the
    /// key is unknown or already completed.
    pub fn mark_completed(&mut self, key: &SampleKey) -> Result<bool, LedgerError> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let changed = self.conn.execute(
            "UPDATE assignments SET completed_at = ?1
             WHERE sample_no = ?2 AND item = ?3 AND completed_at IS NULL",
            params![now, key.sample_no, key.item],
        )?;
        Ok(changed == 1)
    }

    /// Record an export fingerprint. Returns true the first time a
    /// fingerprint is seen, false on re-delivery.
    pub fn record_ingest(&mut self, fingerprint: &str, source: &str) -> Result<bool, LedgerError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO ingest_log (fingerprint, source_path, ingested_at)
             VALUES (?1, ?2, ?3)",
            params![fingerprint, source, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }
}

impl LoadTracker for SqliteLedger {
    fn today_loads(&self) -> Result<HashMap<String, u64>, LedgerError> {
        SqliteLedger::today_loads(self)
    }
}

impl KeyIndex for SqliteLedger {
    fn assigned_keys(&self) -> Result<HashSet<SampleKey>, LedgerError> {
        SqliteLedger::assigned_keys(self)
    }
}

fn parse_local(raw: &str) -> Result<chrono::DateTime<Local>, LedgerError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|_| LedgerError::BadTimestamp(raw.to_string()))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| LedgerError::BadTimestamp(raw.to_string()))
}
