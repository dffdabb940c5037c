//! Copy completed steps and checkpoint authorizations between ledger backends.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::types::StepStatus;
use crate::ledger::{Approvals, Ledger};
use crate::manifest::Manifest;

/// Approver written for completed records that carry no provenance.
pub const MIGRATION_APPROVER: &str = "migration_tool";

/// Copy every COMPLETE record, with its approver and original timestamp, from
/// `source` into `target`. Other statuses are left alone.
///
/// Manifest steps are copied first, in manifest order, then checkpoint
/// authorizations in key order. Returns the migrated keys.
pub fn migrate<S>(manifest: &Manifest, source: &S, target: &dyn Ledger) -> Result<Vec<String>>
where
    S: Ledger + Approvals + ?Sized,
{
    let current = source.get_status(manifest);
    let mut migrated = Vec::new();
    for (step_id, state) in current.iter() {
        if state.status != StepStatus::Complete {
            continue;
        }
        let approver = state.approver.as_deref().unwrap_or(MIGRATION_APPROVER);
        target
            .update_status(step_id, StepStatus::Complete, approver, state.timestamp)
            .with_context(|| format!("migrate step '{step_id}'"))?;
        migrated.push(step_id.to_string());
    }

    let checkpoints = source
        .checkpoint_records()
        .context("read checkpoint authorizations")?;
    for (key, record) in checkpoints {
        if record.status != StepStatus::Complete {
            continue;
        }
        let approver = record.approver.as_deref().unwrap_or(MIGRATION_APPROVER);
        target
            .update_status(&key, StepStatus::Complete, approver, record.timestamp)
            .with_context(|| format!("migrate checkpoint '{key}'"))?;
        migrated.push(key);
    }
    info!(count = migrated.len(), "ledger migrated");
    Ok(migrated)
}
