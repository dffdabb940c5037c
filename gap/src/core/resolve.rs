//! Status resolution: one pure pass over the manifest per query.
//!
//! Inputs are three independently observed facts per step (artifact presence,
//! proposal presence, recorded provenance). Filesystem facts decide the
//! status; the ledger only decorates COMPLETE steps with timestamp/approver.

use std::collections::BTreeMap;

use crate::core::types::{LedgerRecord, StatusMap, StepState, StepStatus};
use crate::manifest::{Manifest, Step};

/// Observed filesystem facts for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactPresence {
    /// Live artifact exists under the project root.
    pub live: bool,
    /// Staged proposal exists under the proposals root.
    pub proposed: bool,
}

/// Decide a single step's status from its facts.
pub fn classify(dependencies_met: bool, presence: ArtifactPresence) -> StepStatus {
    if presence.live {
        if dependencies_met {
            StepStatus::Complete
        } else {
            StepStatus::Invalid
        }
    } else if presence.proposed {
        StepStatus::Pending
    } else if dependencies_met {
        StepStatus::Unlocked
    } else {
        StepStatus::Locked
    }
}

/// Resolve every step in declared order.
///
/// A dependency counts as met only if it already resolved to COMPLETE earlier
/// in this pass; dependencies declared later, or not at all, are unmet.
pub fn resolve_statuses<F>(
    manifest: &Manifest,
    records: &BTreeMap<String, LedgerRecord>,
    mut observe: F,
) -> StatusMap
where
    F: FnMut(&Step) -> ArtifactPresence,
{
    let mut resolved = StatusMap::new();
    for step in manifest.steps() {
        if resolved.get(&step.id).is_some() {
            continue;
        }
        let dependencies_met = step
            .needs
            .iter()
            .all(|need| resolved.status(need) == Some(StepStatus::Complete));
        let status = classify(dependencies_met, observe(step));

        let mut state = StepState::bare(status);
        if status == StepStatus::Complete {
            if let Some(record) = records.get(&step.id) {
                if record.status == StepStatus::Complete {
                    state.timestamp = record.timestamp;
                    state.approver = record.approver.clone();
                }
            }
        }
        resolved.insert(step.id.clone(), state);
    }
    resolved
}
