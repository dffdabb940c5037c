//! Document-file record store (`.gap/status.yaml`).
//!
//! Layout:
//!
//! ```yaml
//! steps:
//!   requirements:
//!     status: complete
//!     timestamp: 2025-01-01T12:00:00Z
//!     approver: alice
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use super::atomic::write_atomic;
use crate::core::types::LedgerRecord;
use crate::ledger::RecordStore;

const STEPS_KEY: &str = "steps";

#[derive(Debug, Clone)]
pub struct YamlRecordStore {
    path: PathBuf,
}

impl YamlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Raw `steps` mapping; unknown or corrupt entries are carried through.
    fn read_steps(&self) -> Result<Mapping> {
        if !self.path.exists() {
            return Ok(Mapping::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;
        let document: Value = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse ledger {}", self.path.display()))?;
        match document {
            Value::Null => Ok(Mapping::new()),
            Value::Mapping(mut root) => match root.remove(STEPS_KEY) {
                None | Some(Value::Null) => Ok(Mapping::new()),
                Some(Value::Mapping(steps)) => Ok(steps),
                Some(_) => Err(anyhow!(
                    "ledger {}: `steps` must be a mapping",
                    self.path.display()
                )),
            },
            _ => Err(anyhow!(
                "ledger {}: document must be a mapping",
                self.path.display()
            )),
        }
    }
}

impl RecordStore for YamlRecordStore {
    fn load(&self) -> Result<BTreeMap<String, LedgerRecord>> {
        let steps = self.read_steps()?;
        let mut records = BTreeMap::new();
        for (key, entry) in steps {
            let Some(key) = key.as_str().map(str::to_string) else {
                warn!(path = %self.path.display(), "skipping ledger entry with non-string key");
                continue;
            };
            match serde_yaml::from_value::<LedgerRecord>(entry) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(err) => {
                    warn!(path = %self.path.display(), key = %key, error = %err, "skipping corrupt ledger entry");
                }
            }
        }
        debug!(path = %self.path.display(), records = records.len(), "yaml ledger loaded");
        Ok(records)
    }

    fn write(&self, key: &str, record: &LedgerRecord) -> Result<()> {
        let mut steps = self.read_steps()?;
        let entry = serde_yaml::to_value(record).context("serialize ledger record")?;
        steps.insert(Value::String(key.to_string()), entry);

        let mut root = Mapping::new();
        root.insert(Value::String(STEPS_KEY.to_string()), Value::Mapping(steps));
        let buf = serde_yaml::to_string(&Value::Mapping(root)).context("serialize ledger")?;
        write_atomic(&self.path, &buf)?;
        debug!(path = %self.path.display(), key, status = %record.status, "yaml ledger record written");
        Ok(())
    }
}
