//! Test-only helpers for building manifests, records and scratch projects.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::types::{LedgerRecord, StepStatus};
use crate::io::paths::GapPaths;
use crate::manifest::{GateMode, Manifest, Step};

/// A manual-gate step.
pub fn step(id: &str, artifact: &str, needs: &[&str]) -> Step {
    Step::new(id, artifact, GateMode::Manual, needs)
}

/// A flat manifest named `test`.
pub fn flat_manifest(steps: Vec<Step>) -> Manifest {
    Manifest::new("test", "1.0", steps)
}

/// `a` (no deps) -> `b` (needs a) -> `c` (needs b), artifacts `<id>.md`.
pub fn chain_manifest() -> Manifest {
    flat_manifest(vec![
        step("a", "a.md", &[]),
        step("b", "b.md", &["a"]),
        step("c", "c.md", &["b"]),
    ])
}

/// Fixed instant so records compare equal across backends.
pub fn fixed_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5)
        .single()
        .expect("valid timestamp")
}

pub fn record(status: StepStatus, approver: &str) -> LedgerRecord {
    LedgerRecord {
        status,
        timestamp: Some(fixed_timestamp()),
        approver: Some(approver.to_string()),
    }
}

/// Scratch project root that is removed on drop.
pub struct TestProject {
    temp: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> GapPaths {
        GapPaths::new(self.root())
    }

    /// Write a file relative to the project root, creating parents.
    pub fn write_raw(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    pub fn write_live(&self, artifact: &str, contents: &str) -> PathBuf {
        self.write_raw(artifact, contents)
    }

    pub fn write_proposal(&self, artifact: &str, contents: &str) -> PathBuf {
        self.write_raw(&format!(".gap/proposals/{artifact}"), contents)
    }

    pub fn write_manifest(&self, yaml: &str) -> PathBuf {
        self.write_raw("manifest.yaml", yaml)
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root().join(rel)).ok()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
