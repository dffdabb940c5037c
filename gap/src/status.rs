//! Status report rendering.

use chrono::SecondsFormat;

use crate::core::types::{StatusMap, StepState, StepStatus};
use crate::manifest::{GateMode, Manifest};

/// One line per step, in manifest order, ids padded to a common width.
///
/// Phased manifests get a `phase i/n: name` header where each phase begins.
pub fn render_status(manifest: &Manifest, statuses: &StatusMap) -> Vec<String> {
    let width = statuses.iter().map(|(id, _)| id.len()).max().unwrap_or(0);
    let phases = manifest.phases();
    let mut current: Option<&str> = None;
    let mut lines = Vec::new();
    for (id, state) in statuses.iter() {
        let step = manifest.step(id);
        let phase = step.and_then(|step| step.phase.as_deref());
        if let Some(phase) = phase.filter(|phase| current != Some(*phase)) {
            let index = phases.iter().position(|seen| *seen == phase).map_or(0, |i| i + 1);
            lines.push(format!("phase {index}/{}: {phase}", phases.len()));
            current = Some(phase);
        }
        lines.push(render_line(id, width, step.map(|step| step.gate), state));
    }
    lines
}

fn render_line(id: &str, width: usize, gate: Option<GateMode>, state: &StepState) -> String {
    let mut line = format!("{id:<width$}  {:<8}", label(state.status));
    if gate == Some(GateMode::Auto) {
        line.push_str("  (auto)");
    }
    if let Some(approver) = &state.approver {
        line.push_str(&format!("  approved by {approver}"));
    }
    if let Some(timestamp) = state.timestamp {
        line.push_str(&format!(
            " at {}",
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    line.trim_end().to_string()
}

fn label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Locked => "LOCKED",
        StepStatus::Unlocked => "UNLOCKED",
        StepStatus::Pending => "PENDING",
        StepStatus::Complete => "COMPLETE",
        StepStatus::Invalid => "INVALID",
    }
}

/// Steps whose live artifact exists despite unmet dependencies.
pub fn drifted(statuses: &StatusMap) -> Vec<&str> {
    statuses
        .iter()
        .filter(|(_, state)| state.status == StepStatus::Invalid)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chain_manifest, fixed_timestamp, flat_manifest, step};

    #[test]
    fn lines_follow_manifest_order_with_provenance() {
        let mut map = StatusMap::new();
        map.insert(
            "a",
            StepState {
                status: StepStatus::Complete,
                timestamp: Some(fixed_timestamp()),
                approver: Some("alice".to_string()),
            },
        );
        map.insert("b", StepState::bare(StepStatus::Invalid));
        map.insert("c", StepState::bare(StepStatus::Locked));

        let lines = render_status(&chain_manifest(), &map);
        assert_eq!(
            lines,
            vec![
                "a  COMPLETE  approved by alice at 2025-01-02T03:04:05Z",
                "b  INVALID",
                "c  LOCKED",
            ]
        );
        assert_eq!(drifted(&map), vec!["b"]);
    }

    /// Verifies phased manifests are rendered under numbered phase headers.
    #[test]
    fn phases_head_their_steps() {
        let mut steps = vec![step("req", "req.md", &[]), step("code", "main.rs", &["req"])];
        steps[0].phase = Some("plan".to_string());
        steps[1].phase = Some("build".to_string());
        let manifest = flat_manifest(steps);

        let mut map = StatusMap::new();
        map.insert("req", StepState::bare(StepStatus::Unlocked));
        map.insert("code", StepState::bare(StepStatus::Locked));

        assert_eq!(
            render_status(&manifest, &map),
            vec![
                "phase 1/2: plan",
                "req   UNLOCKED",
                "phase 2/2: build",
                "code  LOCKED",
            ]
        );
    }
}
