//! Runtime checkpoints between tasks.
//!
//! The manifest's checkpoint policy decides whether a task must pause; a
//! paused task proceeds once a COMPLETE authorization record exists for it
//! under `task:<id>` (or `task:<phase>/<id>`).

use std::fmt;

use anyhow::Result;
use tracing::{debug, info};

use crate::core::types::StepStatus;
use crate::ledger::{Approvals, Ledger};
use crate::manifest::{CheckpointPolicy, CheckpointStrategy, Manifest};

/// Outcome of a checkpoint verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointDecision {
    Proceed { reason: String },
    Blocked {
        strategy: CheckpointStrategy,
        remediation: String,
    },
}

impl CheckpointDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, CheckpointDecision::Blocked { .. })
    }
}

impl fmt::Display for CheckpointDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointDecision::Proceed { reason } => write!(f, "proceed: {reason}"),
            CheckpointDecision::Blocked {
                strategy,
                remediation,
            } => write!(
                f,
                "blocked (strategy: {strategy}); action required: {remediation}"
            ),
        }
    }
}

/// Prefix shared by every checkpoint authorization key.
pub const CHECKPOINT_PREFIX: &str = "task:";

/// Ledger key holding a task's authorization.
pub fn checkpoint_key(task_id: &str, phase: Option<&str>) -> String {
    match phase {
        Some(phase) => format!("{CHECKPOINT_PREFIX}{phase}/{task_id}"),
        None => format!("{CHECKPOINT_PREFIX}{task_id}"),
    }
}

/// Whether `policy` pauses before `task_id` proceeds.
pub fn requires_pause(policy: &CheckpointPolicy, task_id: &str, phase: Option<&str>) -> bool {
    match policy.strategy {
        CheckpointStrategy::Never => false,
        CheckpointStrategy::Every => true,
        CheckpointStrategy::Explicit => {
            let qualified = phase.map(|phase| format!("{phase}/{task_id}"));
            policy
                .after_tasks
                .iter()
                .any(|listed| listed == task_id || qualified.as_deref() == Some(listed.as_str()))
        }
    }
}

fn remediation(task_id: &str, phase: Option<&str>) -> String {
    match phase {
        Some(phase) => format!("gap checkpoint approve {task_id} --phase {phase}"),
        None => format!("gap checkpoint approve {task_id}"),
    }
}

/// Decide whether `task_id` may proceed.
pub fn verify<A>(
    manifest: &Manifest,
    approvals: &A,
    task_id: &str,
    phase: Option<&str>,
) -> Result<CheckpointDecision>
where
    A: Approvals + ?Sized,
{
    let Some(policy) = manifest.checkpoints.as_ref() else {
        return Ok(CheckpointDecision::Proceed {
            reason: "no checkpoints configured".to_string(),
        });
    };
    if !requires_pause(policy, task_id, phase) {
        debug!(task = task_id, strategy = %policy.strategy, "checkpoint not required");
        return Ok(CheckpointDecision::Proceed {
            reason: format!("checkpoint not required (strategy: {})", policy.strategy),
        });
    }

    let key = checkpoint_key(task_id, phase);
    if let Some(record) = approvals.approval(&key)? {
        if record.status == StepStatus::Complete {
            let reason = match record.approver {
                Some(approver) => format!("checkpoint approved by {approver}"),
                None => "checkpoint approved".to_string(),
            };
            return Ok(CheckpointDecision::Proceed { reason });
        }
    }
    debug!(task = task_id, key = %key, "checkpoint blocked");
    Ok(CheckpointDecision::Blocked {
        strategy: policy.strategy,
        remediation: remediation(task_id, phase),
    })
}

/// Record a COMPLETE authorization for a task.
pub fn approve(
    ledger: &dyn Ledger,
    task_id: &str,
    phase: Option<&str>,
    approver: &str,
) -> Result<String> {
    let key = checkpoint_key(task_id, phase);
    ledger.update_status(&key, StepStatus::Complete, approver, None)?;
    info!(task = task_id, key = %key, approver, "checkpoint approved");
    Ok(key)
}
