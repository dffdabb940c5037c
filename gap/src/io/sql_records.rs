//! Relational record store (SQLite) with an append-only history trail.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use crate::core::types::{self, LedgerRecord, StepStatus};
use crate::ledger::RecordStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  protocol TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS steps (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  project_id INTEGER NOT NULL REFERENCES projects(id),
  name TEXT NOT NULL,
  status TEXT NOT NULL,
  approver TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  step_id INTEGER NOT NULL REFERENCES steps(id),
  old_status TEXT NOT NULL,
  new_status TEXT NOT NULL,
  actor TEXT NOT NULL,
  timestamp TEXT NOT NULL
);
"#;

/// One row of a step's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// `None` for the first record of a step.
    pub old_status: Option<StepStatus>,
    pub new_status: StepStatus,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SqliteRecordStore {
    path: PathBuf,
    conn: Connection,
    project_id: i64,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database and register `project`.
    pub fn open(path: &Path, project: &str, protocol: &str) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open ledger database {}", path.display()))?;
        conn.execute_batch(SCHEMA)
            .with_context(|| format!("create ledger schema in {}", path.display()))?;
        conn.execute(
            "INSERT OR IGNORE INTO projects (name, protocol, created_at) VALUES (?1, ?2, ?3)",
            params![project, protocol, format_timestamp(Utc::now())],
        )
        .with_context(|| format!("register project '{project}'"))?;
        let project_id: i64 = conn
            .query_row(
                "SELECT id FROM projects WHERE name = ?1",
                params![project],
                |row| row.get(0),
            )
            .with_context(|| format!("look up project '{project}'"))?;
        debug!(path = %path.display(), project, project_id, "sqlite ledger opened");
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            project_id,
        })
    }

    /// Audit trail for one ledger key, oldest first.
    pub fn history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT h.old_status, h.new_status, h.actor, h.timestamp
             FROM history h JOIN steps s ON s.id = h.step_id
             WHERE s.project_id = ?1 AND s.name = ?2
             ORDER BY h.id",
        )?;
        let rows = stmt.query_map(params![self.project_id, key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (old, new, actor, timestamp) = row?;
            let old_status = if old.is_empty() {
                None
            } else {
                Some(parse_status(&old)?)
            };
            entries.push(HistoryEntry {
                old_status,
                new_status: parse_status(&new)?,
                actor,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(entries)
    }
}

impl RecordStore for SqliteRecordStore {
    fn load(&self) -> Result<BTreeMap<String, LedgerRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, status, approver, timestamp FROM steps WHERE project_id = ?1")
            .context("prepare step query")?;
        let rows = stmt.query_map(params![self.project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = BTreeMap::new();
        for row in rows {
            let (name, status, approver, timestamp) = row.context("read step row")?;
            let parsed = parse_status(&status)
                .and_then(|status| Ok((status, parse_optional_timestamp(&timestamp)?)));
            match parsed {
                Ok((status, timestamp)) => {
                    records.insert(
                        name,
                        LedgerRecord {
                            status,
                            timestamp,
                            approver: Some(approver).filter(|approver| !approver.is_empty()),
                        },
                    );
                }
                Err(err) => {
                    warn!(key = %name, error = %err, "skipping corrupt ledger row");
                }
            }
        }
        debug!(path = %self.path.display(), records = records.len(), "sqlite ledger loaded");
        Ok(records)
    }

    fn write(&self, key: &str, record: &LedgerRecord) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin ledger transaction")?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT status FROM steps WHERE project_id = ?1 AND name = ?2",
                params![self.project_id, key],
                |row| row.get(0),
            )
            .optional()?;
        let timestamp = record.timestamp.map(format_timestamp).unwrap_or_default();
        let approver = record.approver.as_deref().unwrap_or_default();
        tx.execute(
            "INSERT INTO steps (project_id, name, status, approver, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (project_id, name) DO UPDATE SET
               status = excluded.status,
               approver = excluded.approver,
               timestamp = excluded.timestamp",
            params![
                self.project_id,
                key,
                record.status.as_str(),
                approver,
                timestamp
            ],
        )
        .with_context(|| format!("upsert step '{key}'"))?;
        let step_id: i64 = tx.query_row(
            "SELECT id FROM steps WHERE project_id = ?1 AND name = ?2",
            params![self.project_id, key],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO history (step_id, old_status, new_status, actor, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                step_id,
                previous.unwrap_or_default(),
                record.status.as_str(),
                approver,
                format_timestamp(record.timestamp.unwrap_or_else(Utc::now))
            ],
        )
        .with_context(|| format!("append history for '{key}'"))?;
        tx.commit().context("commit ledger transaction")?;
        debug!(key, status = %record.status, "sqlite ledger record written");
        Ok(())
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    types::parse_timestamp(raw).ok_or_else(|| anyhow!("invalid timestamp '{raw}'"))
}

/// Empty columns hold records written without a timestamp.
fn parse_optional_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    parse_timestamp(raw).map(Some)
}

fn parse_status(raw: &str) -> Result<StepStatus> {
    StepStatus::parse(raw).ok_or_else(|| anyhow!("invalid status '{raw}'"))
}
