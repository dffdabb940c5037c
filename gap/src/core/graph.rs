//! Static dependency-graph checks over a manifest.
//!
//! Every check is independent and cumulative; problems are collected as
//! findings so a single pass reports all of them. Nothing here mutates the
//! manifest.

use std::collections::{HashMap, HashSet};

use crate::core::types::Finding;
use crate::manifest::Manifest;

/// Run all graph checks. An empty result means the dependency relation is a
/// DAG whose references all resolve.
pub fn validate_manifest(manifest: &Manifest) -> Vec<Finding> {
    let mut findings = Vec::new();
    findings.extend(check_duplicate_ids(manifest));
    findings.extend(check_self_dependencies(manifest));
    findings.extend(check_dangling_references(manifest));
    findings.extend(check_cycles(manifest));
    findings
}

fn check_duplicate_ids(manifest: &Manifest) -> Vec<Finding> {
    let mut seen = HashSet::new();
    manifest
        .steps()
        .iter()
        .filter(|step| !seen.insert(step.id.as_str()))
        .map(|step| Finding::error(format!("duplicate step id '{}'", step.id)))
        .collect()
}

fn check_self_dependencies(manifest: &Manifest) -> Vec<Finding> {
    manifest
        .steps()
        .iter()
        .filter(|step| step.needs.iter().any(|need| need == &step.id))
        .map(|step| Finding::error(format!("step '{}' depends on itself", step.id)))
        .collect()
}

fn check_dangling_references(manifest: &Manifest) -> Vec<Finding> {
    let declared: HashSet<&str> = manifest.steps().iter().map(|s| s.id.as_str()).collect();
    let mut findings = Vec::new();
    for step in manifest.steps() {
        for need in &step.needs {
            if !declared.contains(need.as_str()) {
                findings.push(Finding::error(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, need
                )));
            }
        }
    }
    findings
}

/// Depth-first search with an explicit work stack.
///
/// `on_stack` holds the nodes of the current walk; `explored` holds nodes whose
/// every outgoing edge has been followed. An edge into `on_stack` closes a
/// cycle. Self-edges and dangling edges are reported by their own checks.
fn check_cycles(manifest: &Manifest) -> Vec<Finding> {
    let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for step in manifest.steps() {
        if graph.contains_key(step.id.as_str()) {
            continue;
        }
        order.push(step.id.as_str());
        graph.insert(
            step.id.as_str(),
            step.needs.iter().map(String::as_str).collect(),
        );
    }

    let mut explored: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<Vec<&str>> = HashSet::new();
    let mut findings = Vec::new();

    for &start in &order {
        if explored.contains(start) {
            continue;
        }

        let mut frames: Vec<(&str, usize)> = vec![(start, 0)];
        let mut path: Vec<&str> = vec![start];
        let mut on_stack: HashSet<&str> = HashSet::from([start]);

        while let Some(frame) = frames.last_mut() {
            let node = frame.0;
            let neighbors = &graph[node];
            if frame.1 >= neighbors.len() {
                frames.pop();
                path.pop();
                on_stack.remove(node);
                explored.insert(node);
                continue;
            }
            let next = neighbors[frame.1];
            frame.1 += 1;

            if next == node || !graph.contains_key(next) {
                continue;
            }
            if on_stack.contains(next) {
                let begin = path.iter().position(|&id| id == next).unwrap_or(0);
                let members = path[begin..].to_vec();
                if reported.insert(canonical_rotation(&members)) {
                    let mut walk = members;
                    walk.push(next);
                    findings.push(Finding::error(format!(
                        "circular dependency detected: {}",
                        walk.join(" -> ")
                    )));
                }
            } else if !explored.contains(next) {
                frames.push((next, 0));
                path.push(next);
                on_stack.insert(next);
            }
        }
    }

    findings
}

/// Rotate a cycle so it starts at its smallest member; equal cycles found
/// from different entry points compare equal.
fn canonical_rotation<'a>(members: &[&'a str]) -> Vec<&'a str> {
    let pivot = members
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(index, _)| index)
        .unwrap_or(0);
    members[pivot..]
        .iter()
        .chain(members[..pivot].iter())
        .copied()
        .collect()
}
