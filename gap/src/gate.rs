//! Gate operations: list, approve and reject staged proposals.
//!
//! Approval promotes a proposal to its live path and records COMPLETE as one
//! local unit. Everything happens under `.gap/gate.lock`; a failure after the
//! first mutation restores the proposal, the prior live content and the prior
//! ACL cache before the error is reported.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::acl::{AclContext, extract_acl};
use crate::core::types::StepStatus;
use crate::io::acl_store::write_cache;
use crate::io::lock::GateLock;
use crate::io::paths::GapPaths;
use crate::ledger::Ledger;
use crate::manifest::{Manifest, Step};

/// A promotion that failed after it started mutating the project.
#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("approval of '{step}' failed and was rolled back: {cause}")]
    RolledBack { step: String, cause: String },
    #[error("approval of '{step}' failed and rollback was incomplete: {cause}; rollback: {rollback}")]
    RollbackFailed {
        step: String,
        cause: String,
        rollback: String,
    },
}

/// Result of a successful approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub step: String,
    pub live_path: PathBuf,
    pub acl: AclContext,
    /// True if prior live content was replaced.
    pub replaced: bool,
}

/// Every staged file under `.gap/proposals/`, relative and sorted.
pub fn list_proposals(paths: &GapPaths) -> Result<Vec<PathBuf>> {
    if !paths.proposals_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut proposals = Vec::new();
    for entry in WalkDir::new(&paths.proposals_dir) {
        let entry = entry
            .with_context(|| format!("scan proposals {}", paths.proposals_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&paths.proposals_dir)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        proposals.push(rel.to_path_buf());
    }
    proposals.sort();
    Ok(proposals)
}

/// Promote a step's proposal to its live artifact and record COMPLETE.
pub fn approve_step(
    paths: &GapPaths,
    manifest: &Manifest,
    ledger: &dyn Ledger,
    step_id: &str,
    approver: &str,
) -> Result<Approval> {
    let step = find_step(manifest, step_id)?;
    let _lock = GateLock::acquire(&paths.lock_path)?;

    let proposal = paths.proposal(step);
    if !proposal.is_file() {
        return Err(anyhow!(
            "no proposal for step '{step_id}' at {}",
            proposal.display()
        ));
    }
    let content = fs::read_to_string(&proposal)
        .with_context(|| format!("read proposal {}", proposal.display()))?;
    let acl = extract_acl(&content);

    let current = ledger.get_status(manifest);
    let unmet: Vec<&str> = step
        .needs
        .iter()
        .map(String::as_str)
        .filter(|need| current.status(need) != Some(StepStatus::Complete))
        .collect();
    if !unmet.is_empty() {
        warn!(step = step_id, unmet = ?unmet, "approving with incomplete dependencies; step will resolve invalid");
    }

    let mut promotion = Promotion::new(paths, step)?;
    let outcome = promotion.run(&content, &acl, ledger, approver);
    match outcome {
        Ok(()) => {
            promotion.finish();
            info!(step = step_id, approver, live = %promotion.live.display(), "proposal approved");
            Ok(Approval {
                step: step_id.to_string(),
                live_path: promotion.live.clone(),
                acl,
                replaced: promotion.backed_up,
            })
        }
        Err(err) => {
            let cause = format!("{err:#}");
            match promotion.rollback() {
                Ok(()) => {
                    warn!(step = step_id, error = %cause, "approval rolled back");
                    Err(PromotionError::RolledBack {
                        step: step_id.to_string(),
                        cause,
                    }
                    .into())
                }
                Err(rollback) => Err(PromotionError::RollbackFailed {
                    step: step_id.to_string(),
                    cause,
                    rollback: format!("{rollback:#}"),
                }
                .into()),
            }
        }
    }
}

/// Discard a step's staged proposal. The ledger is not touched.
pub fn reject_step(paths: &GapPaths, manifest: &Manifest, step_id: &str) -> Result<PathBuf> {
    let step = find_step(manifest, step_id)?;
    let _lock = GateLock::acquire(&paths.lock_path)?;
    let proposal = paths.proposal(step);
    if !proposal.is_file() {
        return Err(anyhow!(
            "no proposal for step '{step_id}' at {}",
            proposal.display()
        ));
    }
    fs::remove_file(&proposal)
        .with_context(|| format!("remove proposal {}", proposal.display()))?;
    info!(step = step_id, "proposal rejected");
    Ok(proposal)
}

fn find_step<'a>(manifest: &'a Manifest, step_id: &str) -> Result<&'a Step> {
    manifest
        .step(step_id)
        .ok_or_else(|| anyhow!("step '{step_id}' not found in manifest"))
}

/// Tracks completed mutations so they can be undone in reverse.
struct Promotion {
    step: String,
    proposal: PathBuf,
    live: PathBuf,
    backup: PathBuf,
    cache: PathBuf,
    prior_cache: Option<String>,
    cache_written: bool,
    backed_up: bool,
    moved: bool,
}

impl Promotion {
    fn new(paths: &GapPaths, step: &Step) -> Result<Self> {
        let cache = paths.acl_cache(&step.id);
        let prior_cache = if cache.is_file() {
            Some(
                fs::read_to_string(&cache)
                    .with_context(|| format!("read acl cache {}", cache.display()))?,
            )
        } else {
            None
        };
        Ok(Self {
            step: step.id.clone(),
            proposal: paths.proposal(step),
            live: paths.live_artifact(step),
            backup: paths.backup(&step.id),
            cache,
            prior_cache,
            cache_written: false,
            backed_up: false,
            moved: false,
        })
    }

    fn run(&mut self, content: &str, acl: &AclContext, ledger: &dyn Ledger, approver: &str) -> Result<()> {
        write_cache(&self.cache, acl, content)?;
        self.cache_written = true;

        if self.live.exists() {
            ensure_parent(&self.backup)?;
            fs::copy(&self.live, &self.backup).with_context(|| {
                format!("back up {} to {}", self.live.display(), self.backup.display())
            })?;
            self.backed_up = true;
        }

        ensure_parent(&self.live)?;
        fs::rename(&self.proposal, &self.live).with_context(|| {
            format!("move {} to {}", self.proposal.display(), self.live.display())
        })?;
        self.moved = true;
        debug!(step = %self.step, "proposal moved to live path");

        ledger.update_status(&self.step, StepStatus::Complete, approver, None)
    }

    fn finish(&self) {
        if self.backed_up {
            if let Err(err) = fs::remove_file(&self.backup) {
                warn!(path = %self.backup.display(), error = %err, "failed to remove backup");
            }
        }
    }

    /// Undo in reverse order. Keeps going after a failure and reports all of them.
    fn rollback(&self) -> Result<()> {
        let mut failures = Vec::new();

        if self.moved {
            if let Err(err) = ensure_parent(&self.proposal)
                .and_then(|()| rename(&self.live, &self.proposal))
            {
                failures.push(format!("{err:#}"));
            }
        }
        if self.backed_up {
            if let Err(err) = rename(&self.backup, &self.live) {
                failures.push(format!("{err:#}"));
            }
        }
        if self.cache_written {
            let restored = match &self.prior_cache {
                Some(prior) => fs::write(&self.cache, prior),
                None => fs::remove_file(&self.cache),
            };
            if let Err(err) = restored {
                failures.push(format!("restore acl cache {}: {err}", self.cache.display()));
            }
        }

        if failures.is_empty() {
            debug!(step = %self.step, "promotion rolled back");
            Ok(())
        } else {
            Err(anyhow!(failures.join("; ")))
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).with_context(|| format!("move {} to {}", from.display(), to.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StatusMap;
    use crate::io::acl_store::load_cache;
    use crate::ledger::YamlLedger;
    use crate::test_support::{TestProject, chain_manifest};
    use chrono::{DateTime, Utc};

    const PROPOSAL: &str =
        "# A v2\n\n## ACL\n\n```yaml\nallow_write: [\"src/*.py\"]\nallow_exec: [\"pytest\"]\n```\n";

    struct BrokenLedger;

    impl Ledger for BrokenLedger {
        fn get_status(&self, _manifest: &Manifest) -> StatusMap {
            StatusMap::new()
        }

        fn update_status(
            &self,
            _step_id: &str,
            _status: StepStatus,
            _approver: &str,
            _timestamp: Option<DateTime<Utc>>,
        ) -> Result<()> {
            Err(anyhow!("database is locked"))
        }
    }

    /// Verifies approval moves the proposal live, caches its ACL and records COMPLETE.
    #[test]
    fn approve_promotes_caches_and_records() {
        let project = TestProject::new();
        let paths = project.paths();
        project.write_proposal("a.md", PROPOSAL);
        let ledger = YamlLedger::open_yaml(paths.clone());
        let manifest = chain_manifest();

        let approval = approve_step(&paths, &manifest, &ledger, "a", "alice").expect("approve");
        assert!(!approval.replaced);
        assert_eq!(approval.acl.allowed_exec_prefixes, vec!["pytest"]);
        assert_eq!(project.read("a.md").as_deref(), Some(PROPOSAL));
        assert!(project.read(".gap/proposals/a.md").is_none());
        assert!(load_cache(&paths.acl_cache("a")).expect("cache").is_some());

        let status = ledger.get_status(&manifest);
        assert_eq!(status.status("a"), Some(StepStatus::Complete));
        assert_eq!(status.get("a").and_then(|s| s.approver.as_deref()), Some("alice"));
        assert_eq!(status.status("b"), Some(StepStatus::Unlocked));
    }

    #[test]
    fn missing_proposal_fails_without_mutation() {
        let project = TestProject::new();
        let paths = project.paths();
        let ledger = YamlLedger::open_yaml(paths.clone());
        let err = approve_step(&paths, &chain_manifest(), &ledger, "a", "alice")
            .expect_err("no proposal");
        assert!(err.to_string().contains("no proposal"));
        assert!(!paths.ledger_path.exists());
    }

    #[test]
    fn unknown_step_is_rejected() {
        let project = TestProject::new();
        let paths = project.paths();
        let ledger = YamlLedger::open_yaml(paths.clone());
        assert!(approve_step(&paths, &chain_manifest(), &ledger, "zzz", "alice").is_err());
    }

    /// Verifies a ledger failure restores the live artifact, proposal and cache.
    #[test]
    fn failed_record_restores_prior_state() {
        let project = TestProject::new();
        let paths = project.paths();
        project.write_live("a.md", "# A v1\n");
        project.write_proposal("a.md", PROPOSAL);
        project.write_raw(".gap/acl/a.json", "{\"allow_write\":[],\"allow_exec\":[],\"source_sha256\":\"old\"}\n");

        let err = approve_step(&paths, &chain_manifest(), &BrokenLedger, "a", "alice")
            .expect_err("ledger failure");
        let promotion = err.downcast_ref::<PromotionError>().expect("promotion error");
        assert!(matches!(promotion, PromotionError::RolledBack { .. }));

        assert_eq!(project.read("a.md").as_deref(), Some("# A v1\n"));
        assert_eq!(project.read(".gap/proposals/a.md").as_deref(), Some(PROPOSAL));
        let cache = project.read(".gap/acl/a.json").expect("cache");
        assert!(cache.contains("\"old\""));
        assert!(!paths.backup("a").exists());
    }

    #[test]
    fn failed_first_approval_leaves_no_artifact_or_cache() {
        let project = TestProject::new();
        let paths = project.paths();
        project.write_proposal("a.md", PROPOSAL);

        assert!(approve_step(&paths, &chain_manifest(), &BrokenLedger, "a", "alice").is_err());
        assert!(project.read("a.md").is_none());
        assert!(!paths.acl_cache("a").exists());
        assert_eq!(project.read(".gap/proposals/a.md").as_deref(), Some(PROPOSAL));
    }

    #[test]
    fn list_is_sorted_and_relative() {
        let project = TestProject::new();
        project.write_proposal("docs/z.md", "z");
        project.write_proposal("a.md", "a");
        let listed = list_proposals(&project.paths()).expect("list");
        assert_eq!(listed, vec![PathBuf::from("a.md"), PathBuf::from("docs/z.md")]);
    }

    #[test]
    fn list_without_proposals_dir_is_empty() {
        let project = TestProject::new();
        assert!(list_proposals(&project.paths()).expect("list").is_empty());
    }

    /// Verifies rejection deletes the proposal without touching the ledger.
    #[test]
    fn reject_removes_only_the_proposal() {
        let project = TestProject::new();
        let paths = project.paths();
        project.write_proposal("a.md", PROPOSAL);
        reject_step(&paths, &chain_manifest(), "a").expect("reject");
        assert!(project.read(".gap/proposals/a.md").is_none());
        assert!(reject_step(&paths, &chain_manifest(), "a").is_err());
        assert!(!paths.ledger_path.exists());
    }
}
