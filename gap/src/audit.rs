//! Traceability audit over the live artifacts of a project.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::trace::{TasksFormat, TasksSource, TraceSources, audit_sources};
use crate::core::types::Finding;
use crate::io::paths::GapPaths;
use crate::manifest::{Manifest, TraceRole};

/// Audit the requirements, design and tasks artifacts under `root`.
pub fn audit(root: &Path, manifest: &Manifest) -> Vec<Finding> {
    let sources = collect_sources(&GapPaths::new(root), manifest);
    let findings = audit_sources(&sources);
    debug!(findings = findings.len(), "traceability audit finished");
    findings
}

/// Read the artifact bound to each role. Absent steps or files yield `None`.
pub fn collect_sources(paths: &GapPaths, manifest: &Manifest) -> TraceSources {
    let requirements = role_artifact(paths, manifest, TraceRole::Requirements);
    let design = role_artifact(paths, manifest, TraceRole::Design);
    let tasks = role_artifact(paths, manifest, TraceRole::Tasks);

    TraceSources {
        requirements: requirements.as_deref().and_then(read_artifact),
        design_name: design
            .as_deref()
            .map_or_else(|| TraceRole::Design.as_str().to_string(), display_name),
        design: design.as_deref().and_then(read_artifact),
        tasks: tasks.as_deref().and_then(|path| {
            read_artifact(path).map(|content| TasksSource {
                name: display_name(path),
                content,
                format: tasks_format(path),
            })
        }),
    }
}

fn role_artifact(paths: &GapPaths, manifest: &Manifest, role: TraceRole) -> Option<PathBuf> {
    let step_id = manifest.traceability.step_for(role);
    match manifest.step(step_id) {
        Some(step) => Some(paths.live_artifact(step)),
        None => {
            debug!(role = role.as_str(), step = step_id, "no step bound to role");
            None
        }
    }
}

fn read_artifact(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "artifact unreadable; treating as absent");
            None
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn tasks_format(path: &Path) -> TasksFormat {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml" | "yml" | "json") => TasksFormat::Document,
        _ => TasksFormat::Embedded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Severity, has_errors};
    use crate::manifest::TraceRoles;
    use crate::test_support::{TestProject, flat_manifest, step};

    fn manifest() -> Manifest {
        flat_manifest(vec![
            step("requirements", "specs/requirements.md", &[]),
            step("design", "specs/design.md", &["requirements"]),
            step("tasks", "specs/tasks.yaml", &["design"]),
        ])
    }

    /// Verifies an untraced task yields exactly one warning.
    #[test]
    fn three_tasks_one_untraced_is_one_warning() {
        let project = TestProject::new();
        project.write_live("specs/requirements.md", "- **R-01** Login\n");
        project.write_live("specs/design.md", "- **P-01** Hashing (Validates: R-01)\n");
        project.write_live(
            "specs/tasks.yaml",
            "tasks:\n  - {id: TASK-1, traces_to: R-01}\n  - {id: TASK-2, traces_to: P-01}\n  - {id: TASK-3, traces_to: ''}\n",
        );

        let findings = audit(project.root(), &manifest());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert!(!has_errors(&findings));
    }

    #[test]
    fn missing_artifacts_produce_no_findings() {
        let project = TestProject::new();
        assert!(audit(project.root(), &manifest()).is_empty());
    }

    #[test]
    fn markdown_tasks_read_embedded_block() {
        let project = TestProject::new();
        let manifest = flat_manifest(vec![
            step("requirements", "r.md", &[]),
            step("plan", "plan.md", &["requirements"]),
        ])
        .with_traceability(TraceRoles {
            tasks: Some("plan".to_string()),
            ..TraceRoles::default()
        });
        project.write_live("r.md", "- **R-01** Login\n");
        project.write_live("plan.md", "# Plan\n\n```yaml\n- {id: TASK-1, traces_to: R-09}\n```\n");

        let findings = audit(project.root(), &manifest);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].is_error());
        assert!(findings[0].message.contains("plan.md"));
    }

    #[test]
    fn tasks_format_follows_extension() {
        assert_eq!(tasks_format(Path::new("t.YAML")), TasksFormat::Document);
        assert_eq!(tasks_format(Path::new("t.json")), TasksFormat::Document);
        assert_eq!(tasks_format(Path::new("t.md")), TasksFormat::Embedded);
        assert_eq!(tasks_format(Path::new("tasks")), TasksFormat::Embedded);
    }
}
