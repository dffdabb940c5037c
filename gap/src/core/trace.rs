//! Traceability analysis across the requirements, design and tasks artifacts.
//!
//! Identifiers are defined by a fixed lexical grammar; citations link a
//! downstream item to the upstream identifiers it fulfills. Every downstream
//! citation must resolve upstream. Missing artifacts contribute nothing.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::markdown::first_structured_block;
use crate::core::types::Finding;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:G|R|FR|NFR|DP|PROP|P|TASK|H|T)-[A-Z0-9_\-]+|<!--\s*id:\s*(.*?)\s*-->")
        .expect("identifier regex")
});

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((?:Validates|Traces to):[^)]*\)").expect("citation regex")
});

static VALIDATES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(Validates:([^)]*)\)").expect("validates regex"));

/// One task from the tasks artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "traces")]
    pub traces_to: Option<String>,
}

impl TaskRecord {
    fn label(&self, index: usize) -> String {
        self.id
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| format!("#{}", index + 1))
    }
}

/// How the task list is stored inside its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TasksFormat {
    /// The whole file is a YAML/JSON document.
    Document,
    /// The first fenced yaml/json block of a markdown file.
    Embedded,
}

/// Contents of a tasks artifact, with a display name for messages.
#[derive(Debug, Clone)]
pub struct TasksSource {
    pub name: String,
    pub content: String,
    pub format: TasksFormat,
}

/// Artifact texts bound to the three roles. `None` means the artifact is absent.
#[derive(Debug, Clone, Default)]
pub struct TraceSources {
    pub requirements: Option<String>,
    pub design_name: String,
    pub design: Option<String>,
    pub tasks: Option<TasksSource>,
}

/// Identifiers defined in `text`. Tokens inside citations cite, they do not define.
pub fn extract_identifiers(text: &str) -> BTreeSet<String> {
    text.lines().flat_map(defined_on_line).collect()
}

fn defined_on_line(line: &str) -> Vec<String> {
    let stripped = CITATION.replace_all(line, " ");
    IDENTIFIER
        .captures_iter(&stripped)
        .filter_map(|caps| match caps.get(1) {
            Some(comment_id) => {
                let id = comment_id.as_str().trim();
                (!id.is_empty()).then(|| id.to_string())
            }
            None => Some(caps[0].to_string()),
        })
        .collect()
}

fn split_targets(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|target| !target.is_empty())
}

/// Parse the task list. Accepts a top-level list or a `tasks:` key.
pub fn parse_tasks(source: &TasksSource) -> Result<Vec<TaskRecord>, String> {
    let document = match source.format {
        TasksFormat::Document => source.content.clone(),
        TasksFormat::Embedded => first_structured_block(&source.content)
            .ok_or_else(|| "no fenced yaml or json block found".to_string())?,
    };
    let value: serde_yaml::Value =
        serde_yaml::from_str(&document).map_err(|err| err.to_string())?;
    let list = match value {
        serde_yaml::Value::Null => return Ok(Vec::new()),
        serde_yaml::Value::Sequence(items) => serde_yaml::Value::Sequence(items),
        serde_yaml::Value::Mapping(mut map) => match map.remove("tasks") {
            Some(serde_yaml::Value::Null) => return Ok(Vec::new()),
            Some(tasks) => tasks,
            None => return Err("expected a list of tasks or a `tasks:` key".to_string()),
        },
        _ => return Err("expected a list of tasks or a `tasks:` key".to_string()),
    };
    serde_yaml::from_value(list).map_err(|err| err.to_string())
}

/// Run every traceability check. Findings come back in check order.
pub fn audit_sources(sources: &TraceSources) -> Vec<Finding> {
    let requirement_ids = sources
        .requirements
        .as_deref()
        .map(extract_identifiers)
        .unwrap_or_default();
    let design_ids = sources
        .design
        .as_deref()
        .map(extract_identifiers)
        .unwrap_or_default();

    let mut findings = Vec::new();
    if let Some(design) = sources.design.as_deref() {
        findings.extend(check_design_citations(
            &sources.design_name,
            design,
            &requirement_ids,
        ));
    }
    if let Some(tasks) = &sources.tasks {
        let upstream: BTreeSet<String> = design_ids.union(&requirement_ids).cloned().collect();
        findings.extend(check_task_traces(tasks, &upstream));
    }
    if let Some(design) = sources.design.as_deref() {
        findings.extend(check_design_orphans(&sources.design_name, design));
    }
    findings
}

fn check_design_citations(
    name: &str,
    design: &str,
    requirement_ids: &BTreeSet<String>,
) -> Vec<Finding> {
    VALIDATES
        .captures_iter(design)
        .flat_map(|caps| {
            split_targets(caps.get(1).map_or("", |m| m.as_str()))
                .filter(|target| !requirement_ids.contains(*target))
                .map(|target| {
                    Finding::error(format!(
                        "design property in {name} cites unknown requirement '{target}'"
                    ))
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

fn check_task_traces(tasks: &TasksSource, upstream: &BTreeSet<String>) -> Vec<Finding> {
    let records = match parse_tasks(tasks) {
        Ok(records) => records,
        Err(err) => {
            return vec![Finding::error(format!(
                "tasks artifact {} is malformed: {err}",
                tasks.name
            ))];
        }
    };

    let mut findings = Vec::new();
    for (index, record) in records.iter().enumerate() {
        let label = record.label(index);
        match record.traces_to.as_deref().map(str::trim) {
            None | Some("") => findings.push(Finding::warning(format!(
                "orphaned intent: task '{label}' has no trace reference"
            ))),
            Some(target) if !upstream.contains(target) => findings.push(Finding::error(format!(
                "task '{label}' in {} traces to unknown identifier '{target}'",
                tasks.name
            ))),
            Some(_) => {}
        }
    }
    findings
}

fn check_design_orphans(name: &str, design: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in design.lines() {
        if VALIDATES.is_match(line) {
            continue;
        }
        for id in defined_on_line(line) {
            findings.push(Finding::warning(format!(
                "orphaned design identifier '{id}' in {name} has no (Validates: ...) citation"
            )));
        }
    }
    findings
}
