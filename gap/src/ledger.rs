//! State Resolution Engine.
//!
//! A [`Ledger`] answers two questions: what is every step's status right now
//! ([`Ledger::get_status`]) and "record this approval" ([`Ledger::update_status`]).
//! Both backends share one implementation, [`GateLedger`], which runs the pure
//! resolution pass in [`crate::core::resolve`] over a minimal persistence port,
//! [`RecordStore`]. Nothing is cached between calls.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::checkpoint::CHECKPOINT_PREFIX;
use crate::core::resolve::{ArtifactPresence, resolve_statuses};
use crate::core::types::{LedgerRecord, StatusMap, StepStatus};
use crate::io::config::{GapConfig, LedgerBackend};
use crate::io::paths::GapPaths;
use crate::io::sql_records::{HistoryEntry, SqliteRecordStore};
use crate::io::yaml_records::YamlRecordStore;
use crate::manifest::{Manifest, Step};

/// Persistence port: raw provenance records keyed by step id or checkpoint key.
pub trait RecordStore {
    fn load(&self) -> Result<BTreeMap<String, LedgerRecord>>;
    fn write(&self, key: &str, record: &LedgerRecord) -> Result<()>;
}

/// Capability interface shared by every ledger backend.
pub trait Ledger {
    /// Recompute every step's status from current external state.
    ///
    /// Unreadable provenance degrades to empty metadata; this never fails.
    fn get_status(&self, manifest: &Manifest) -> StatusMap;

    /// Persist a record. `timestamp` defaults to now.
    fn update_status(
        &self,
        step_id: &str,
        status: StepStatus,
        approver: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Raw record lookup for keys outside the manifest (checkpoint authorizations).
pub trait Approvals {
    fn approval(&self, key: &str) -> Result<Option<LedgerRecord>>;

    /// Every stored checkpoint authorization, keyed by checkpoint key.
    fn checkpoint_records(&self) -> Result<BTreeMap<String, LedgerRecord>>;
}

/// Stand-in for a backend that could not be opened.
///
/// Reads fail, so status resolves from the filesystem alone. Writes are refused.
#[derive(Debug)]
pub struct UnavailableStore {
    backend: LedgerBackend,
    reason: String,
}

impl UnavailableStore {
    pub fn new(backend: LedgerBackend, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

impl RecordStore for UnavailableStore {
    fn load(&self) -> Result<BTreeMap<String, LedgerRecord>> {
        Err(anyhow!("{:?} ledger unavailable: {}", self.backend, self.reason))
    }

    fn write(&self, key: &str, _record: &LedgerRecord) -> Result<()> {
        Err(anyhow!(
            "{:?} ledger unavailable, cannot record '{key}': {}",
            self.backend,
            self.reason
        ))
    }
}

/// The shared resolution algorithm over a record store.
#[derive(Debug)]
pub struct GateLedger<S> {
    paths: GapPaths,
    store: S,
}

pub type YamlLedger = GateLedger<YamlRecordStore>;
pub type SqlLedger = GateLedger<SqliteRecordStore>;

impl<S: RecordStore> GateLedger<S> {
    pub fn new(paths: GapPaths, store: S) -> Self {
        Self { paths, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn observe(&self, step: &Step) -> ArtifactPresence {
        ArtifactPresence {
            live: self.paths.live_artifact(step).is_file(),
            proposed: self.paths.proposal(step).is_file(),
        }
    }
}

impl YamlLedger {
    pub fn open_yaml(paths: GapPaths) -> Self {
        let store = YamlRecordStore::new(paths.ledger_path.clone());
        Self::new(paths, store)
    }
}

impl SqlLedger {
    pub fn open_sql(paths: GapPaths, database: PathBuf, project: &str, protocol: &str) -> Result<Self> {
        let database = paths.resolve(&database);
        let store = SqliteRecordStore::open(&database, project, protocol)?;
        Ok(Self::new(paths, store))
    }

    pub fn history(&self, step_id: &str) -> Result<Vec<HistoryEntry>> {
        self.store.history(step_id)
    }
}

impl<S: RecordStore> Ledger for GateLedger<S> {
    fn get_status(&self, manifest: &Manifest) -> StatusMap {
        let records = match self.store.load() {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ledger unreadable; resolving without provenance");
                BTreeMap::new()
            }
        };
        let resolved = resolve_statuses(manifest, &records, |step| self.observe(step));
        debug!(steps = resolved.len(), "status resolved");
        resolved
    }

    fn update_status(
        &self,
        step_id: &str,
        status: StepStatus,
        approver: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let record = LedgerRecord {
            status,
            timestamp: Some(timestamp.unwrap_or_else(Utc::now)),
            approver: Some(approver.to_string()),
        };
        self.store
            .write(step_id, &record)
            .with_context(|| format!("record status for '{step_id}'"))?;
        info!(step = step_id, status = %status, approver, "ledger updated");
        Ok(())
    }
}

impl<S: RecordStore> Approvals for GateLedger<S> {
    fn approval(&self, key: &str) -> Result<Option<LedgerRecord>> {
        Ok(self.store.load()?.remove(key))
    }

    fn checkpoint_records(&self) -> Result<BTreeMap<String, LedgerRecord>> {
        let mut records = self.store.load()?;
        records.retain(|key, _| key.starts_with(CHECKPOINT_PREFIX));
        Ok(records)
    }
}

/// Ledger for a project, with the backend chosen by configuration.
#[derive(Debug)]
pub enum ProjectLedger {
    Yaml(YamlLedger),
    Sql(SqlLedger),
    /// The configured backend failed to open; see [`open_ledger_or_degraded`].
    Unavailable(GateLedger<UnavailableStore>),
}

impl ProjectLedger {
    pub fn backend(&self) -> LedgerBackend {
        match self {
            ProjectLedger::Yaml(_) => LedgerBackend::Yaml,
            ProjectLedger::Sql(_) => LedgerBackend::Sqlite,
            ProjectLedger::Unavailable(ledger) => ledger.store().backend,
        }
    }

    fn as_ledger(&self) -> &dyn Ledger {
        match self {
            ProjectLedger::Yaml(ledger) => ledger,
            ProjectLedger::Sql(ledger) => ledger,
            ProjectLedger::Unavailable(ledger) => ledger,
        }
    }
}

impl Ledger for ProjectLedger {
    fn get_status(&self, manifest: &Manifest) -> StatusMap {
        self.as_ledger().get_status(manifest)
    }

    fn update_status(
        &self,
        step_id: &str,
        status: StepStatus,
        approver: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.as_ledger()
            .update_status(step_id, status, approver, timestamp)
    }
}

impl Approvals for ProjectLedger {
    fn approval(&self, key: &str) -> Result<Option<LedgerRecord>> {
        match self {
            ProjectLedger::Yaml(ledger) => ledger.approval(key),
            ProjectLedger::Sql(ledger) => ledger.approval(key),
            ProjectLedger::Unavailable(ledger) => ledger.approval(key),
        }
    }

    fn checkpoint_records(&self) -> Result<BTreeMap<String, LedgerRecord>> {
        match self {
            ProjectLedger::Yaml(ledger) => ledger.checkpoint_records(),
            ProjectLedger::Sql(ledger) => ledger.checkpoint_records(),
            ProjectLedger::Unavailable(ledger) => ledger.checkpoint_records(),
        }
    }
}

/// Project name used in relational ledgers.
pub fn project_name<'a>(manifest: &'a Manifest, config: &'a GapConfig) -> &'a str {
    config.ledger.project.as_deref().unwrap_or(&manifest.name)
}

/// Open the configured ledger backend.
pub fn open_ledger(paths: &GapPaths, manifest: &Manifest, config: &GapConfig) -> Result<ProjectLedger> {
    match config.ledger.backend {
        LedgerBackend::Yaml => Ok(ProjectLedger::Yaml(YamlLedger::open_yaml(paths.clone()))),
        LedgerBackend::Sqlite => {
            let ledger = SqlLedger::open_sql(
                paths.clone(),
                config.ledger.database.clone(),
                project_name(manifest, config),
                &manifest.protocol_label(),
            )?;
            Ok(ProjectLedger::Sql(ledger))
        }
    }
}

/// Open the configured ledger for read-only queries.
///
/// A backend that cannot be opened (an unreadable or corrupt database) is
/// logged and replaced by one that resolves without provenance.
pub fn open_ledger_or_degraded(paths: &GapPaths, manifest: &Manifest, config: &GapConfig) -> ProjectLedger {
    match open_ledger(paths, manifest, config) {
        Ok(ledger) => ledger,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(backend = ?config.ledger.backend, error = %reason, "ledger could not be opened; resolving without provenance");
            let store = UnavailableStore::new(config.ledger.backend, reason);
            ProjectLedger::Unavailable(GateLedger::new(paths.clone(), store))
        }
    }
}
