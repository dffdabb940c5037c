//! Canonical paths within a gated project.

use std::path::{Path, PathBuf};

use crate::manifest::Step;

pub const MANIFEST_FILE: &str = "manifest.yaml";

/// All canonical paths within `.gap/` for a project root.
#[derive(Debug, Clone)]
pub struct GapPaths {
    pub root: PathBuf,
    pub gap_dir: PathBuf,
    pub proposals_dir: PathBuf,
    pub acl_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub config_path: PathBuf,
    pub lock_path: PathBuf,
    pub default_database_path: PathBuf,
}

impl GapPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let gap_dir = root.join(".gap");
        Self {
            root: root.clone(),
            gap_dir: gap_dir.clone(),
            proposals_dir: gap_dir.join("proposals"),
            acl_dir: gap_dir.join("acl"),
            backup_dir: gap_dir.join("backup"),
            ledger_path: gap_dir.join("status.yaml"),
            config_path: gap_dir.join("config.toml"),
            lock_path: gap_dir.join("gate.lock"),
            default_database_path: gap_dir.join("ledger.db"),
        }
    }

    /// Default manifest location for this root.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Live artifact path for a step.
    pub fn live_artifact(&self, step: &Step) -> PathBuf {
        self.root.join(&step.artifact)
    }

    /// Staged proposal path for a step, mirroring the artifact path.
    pub fn proposal(&self, step: &Step) -> PathBuf {
        self.proposals_dir.join(&step.artifact)
    }

    /// Cached ACL envelope written when a step is approved.
    pub fn acl_cache(&self, step_id: &str) -> PathBuf {
        self.acl_dir.join(format!("{step_id}.json"))
    }

    /// Transient copy of prior live content held during promotion.
    pub fn backup(&self, step_id: &str) -> PathBuf {
        self.backup_dir.join(format!("{step_id}.prev"))
    }

    /// Resolve a possibly relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{GateMode, Step};

    #[test]
    fn proposal_mirrors_artifact_path() {
        let paths = GapPaths::new("/project");
        let step = Step::new("design", "docs/design.md", GateMode::Manual, &[]);
        assert_eq!(
            paths.proposal(&step),
            PathBuf::from("/project/.gap/proposals/docs/design.md")
        );
        assert_eq!(paths.live_artifact(&step), PathBuf::from("/project/docs/design.md"));
        assert_eq!(paths.acl_cache("design"), PathBuf::from("/project/.gap/acl/design.json"));
    }
}
