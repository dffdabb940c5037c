//! Manifest model: the declarative workflow of gated steps.
//!
//! A manifest declares steps either as a flat `flow` list or grouped under
//! `phases`. Both forms flatten into one ordered step list; steps are
//! immutable once loaded.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Whether promotion of a step's artifact requires a human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RawGate")]
pub enum GateMode {
    Manual,
    Auto,
}

/// Gates are written either as `manual`/`auto` or as a boolean (`true` = manual).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawGate {
    Flag(bool),
    Named(String),
}

impl TryFrom<RawGate> for GateMode {
    type Error = String;

    fn try_from(raw: RawGate) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawGate::Flag(true) => Ok(GateMode::Manual),
            RawGate::Flag(false) => Ok(GateMode::Auto),
            RawGate::Named(name) => match name.trim().to_ascii_lowercase().as_str() {
                "manual" => Ok(GateMode::Manual),
                "auto" => Ok(GateMode::Auto),
                other => Err(format!("unknown gate '{other}' (expected manual or auto)")),
            },
        }
    }
}

/// One declared workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Artifact path relative to the project root.
    pub artifact: String,
    pub gate: GateMode,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Step {
    pub fn new(id: &str, artifact: &str, gate: GateMode, needs: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            artifact: artifact.to_string(),
            gate,
            needs: needs.iter().map(|need| need.to_string()).collect(),
            phase: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    Protocol,
    Project,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Protocol => f.write_str("protocol"),
            ManifestKind::Project => f.write_str("project"),
        }
    }
}

/// When task execution must pause for a human checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStrategy {
    /// Pause only after tasks named in `after_tasks`.
    Explicit,
    /// Pause after every task.
    Every,
    /// Never pause.
    #[serde(alias = "batch")]
    Never,
}

impl fmt::Display for CheckpointStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointStrategy::Explicit => f.write_str("explicit"),
            CheckpointStrategy::Every => f.write_str("every"),
            CheckpointStrategy::Never => f.write_str("never"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    pub strategy: CheckpointStrategy,
    #[serde(default)]
    pub after_tasks: Vec<String>,
}

/// Auditor role bindings. Unset roles resolve to the step named after the role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceRoles {
    pub requirements: Option<String>,
    pub design: Option<String>,
    pub tasks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRole {
    Requirements,
    Design,
    Tasks,
}

impl TraceRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceRole::Requirements => "requirements",
            TraceRole::Design => "design",
            TraceRole::Tasks => "tasks",
        }
    }
}

impl TraceRoles {
    pub fn step_for(&self, role: TraceRole) -> &str {
        let bound = match role {
            TraceRole::Requirements => self.requirements.as_deref(),
            TraceRole::Design => self.design.as_deref(),
            TraceRole::Tasks => self.tasks.as_deref(),
        };
        bound.unwrap_or(role.as_str())
    }
}

/// A loaded, flattened manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub version: String,
    pub description: String,
    pub checkpoints: Option<CheckpointPolicy>,
    pub traceability: TraceRoles,
    steps: Vec<Step>,
}

/// On-disk manifest shape, before flattening.
#[derive(Debug, Clone, Deserialize)]
pub struct RawManifest {
    pub kind: ManifestKind,
    pub name: String,
    pub version: serde_json::Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub flow: Option<Vec<Step>>,
    #[serde(default)]
    pub phases: Option<Vec<RawPhase>>,
    #[serde(default)]
    pub checkpoints: Option<CheckpointPolicy>,
    #[serde(default)]
    pub traceability: TraceRoles,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPhase {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Manifest {
    /// Build a flat protocol manifest directly from steps.
    pub fn new(name: &str, version: &str, steps: Vec<Step>) -> Self {
        Self {
            kind: ManifestKind::Protocol,
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            checkpoints: None,
            traceability: TraceRoles::default(),
            steps,
        }
    }

    /// Flatten a raw manifest. Phase-grouped steps inherit the group name.
    pub fn from_raw(raw: RawManifest) -> Result<Self> {
        let version = match raw.version {
            serde_json::Value::String(version) => version,
            serde_json::Value::Number(number) => number.to_string(),
            other => return Err(anyhow!("version must be a string (got {other})")),
        };

        let steps = match (raw.flow, raw.phases) {
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "manifest declares both `flow` and `phases`; use one"
                ));
            }
            (Some(flow), None) => flow,
            (None, Some(phases)) => phases
                .into_iter()
                .flat_map(|phase| {
                    let RawPhase { name, steps } = phase;
                    steps.into_iter().map(move |mut step| {
                        if step.phase.is_none() {
                            step.phase = Some(name.clone());
                        }
                        step
                    })
                })
                .collect(),
            (None, None) => Vec::new(),
        };

        Ok(Self {
            kind: raw.kind,
            name: raw.name,
            version,
            description: raw.description,
            checkpoints: raw.checkpoints,
            traceability: raw.traceability,
            steps,
        })
    }

    /// Steps in declared order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// First step declared with `id`.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// Distinct phase tags in first-seen order.
    pub fn phases(&self) -> Vec<&str> {
        let mut phases: Vec<&str> = Vec::new();
        for phase in self.steps.iter().filter_map(|step| step.phase.as_deref()) {
            if !phases.contains(&phase) {
                phases.push(phase);
            }
        }
        phases
    }

    /// Protocol label recorded alongside the project in relational ledgers.
    pub fn protocol_label(&self) -> String {
        format!("{}-{}", self.kind, self.version)
    }

    pub fn with_checkpoints(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoints = Some(policy);
        self
    }

    pub fn with_traceability(mut self, roles: TraceRoles) -> Self {
        self.traceability = roles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(yaml: &str) -> RawManifest {
        serde_yaml::from_str(yaml).expect("raw manifest")
    }

    #[test]
    fn boolean_gates_map_to_manual_and_auto() {
        let manifest = Manifest::from_raw(raw(
            "kind: protocol\nname: t\nversion: '1'\nflow:\n  - {step: a, artifact: a.md, gate: true}\n  - {step: b, artifact: b.md, gate: false}\n",
        ))
        .expect("manifest");
        assert_eq!(manifest.steps()[0].gate, GateMode::Manual);
        assert_eq!(manifest.steps()[1].gate, GateMode::Auto);
    }

    #[test]
    fn phases_flatten_in_order_and_tag_steps() {
        let manifest = Manifest::from_raw(raw(
            "kind: project\nname: t\nversion: 2\nphases:\n  - name: plan\n    steps:\n      - {step: req, artifact: r.md, gate: manual}\n  - name: build\n    steps:\n      - {step: impl, artifact: i.md, gate: auto, needs: [req]}\n",
        ))
        .expect("manifest");
        let ids: Vec<&str> = manifest.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["req", "impl"]);
        assert_eq!(manifest.step("impl").and_then(|s| s.phase.as_deref()), Some("build"));
        assert_eq!(manifest.phases(), vec!["plan", "build"]);
        assert_eq!(manifest.version, "2");
    }

    #[test]
    fn flow_and_phases_together_are_rejected() {
        let err = Manifest::from_raw(raw(
            "kind: protocol\nname: t\nversion: '1'\nflow: []\nphases: []\n",
        ))
        .expect_err("both forms");
        assert!(err.to_string().contains("both"));
    }

    #[test]
    fn batch_is_an_alias_for_never() {
        let policy: CheckpointPolicy =
            serde_yaml::from_str("strategy: batch\n").expect("policy");
        assert_eq!(policy.strategy, CheckpointStrategy::Never);
    }

    #[test]
    fn trace_roles_default_to_role_named_steps() {
        let roles = TraceRoles {
            design: Some("architecture".to_string()),
            ..TraceRoles::default()
        };
        assert_eq!(roles.step_for(TraceRole::Design), "architecture");
        assert_eq!(roles.step_for(TraceRole::Tasks), "tasks");
    }
}
