//! Manifest loading with schema validation.

use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::manifest::{Manifest, RawManifest};

const MANIFEST_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/manifest.schema.json"
));

/// Load a manifest from disk. Any failure here is a configuration error.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    if !path.exists() {
        return Err(anyhow!("manifest not found: {}", path.display()));
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read manifest {}", path.display()))?;
    let manifest =
        parse_manifest(&contents).with_context(|| format!("load manifest {}", path.display()))?;
    debug!(
        path = %path.display(),
        name = %manifest.name,
        steps = manifest.steps().len(),
        "manifest loaded"
    );
    Ok(manifest)
}

/// Parse manifest YAML: schema conformance first, then typed deserialization.
pub fn parse_manifest(contents: &str) -> Result<Manifest> {
    let value: Value = serde_yaml::from_str(contents).context("parse manifest yaml")?;
    validate_schema(&value)?;
    let raw: RawManifest = serde_json::from_value(value).context("deserialize manifest")?;
    let manifest = Manifest::from_raw(raw)?;
    check_artifact_paths(&manifest)?;
    Ok(manifest)
}

fn validate_schema(manifest: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(MANIFEST_SCHEMA).context("parse manifest schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    let messages: Vec<String> = compiled
        .iter_errors(manifest)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "manifest schema validation failed:\n- {}",
            messages.join("\n- ")
        ));
    }
    Ok(())
}

/// Artifacts must stay inside the project root.
fn check_artifact_paths(manifest: &Manifest) -> Result<()> {
    let mut errors = Vec::new();
    for step in manifest.steps() {
        let path = Path::new(&step.artifact);
        let escapes = path.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            errors.push(format!(
                "step '{}': artifact '{}' must be a relative path inside the project",
                step.id, step.artifact
            ));
        }
    }
    if errors.is_empty() {
        return Ok(());
    }
    Err(anyhow!("invalid artifact paths:\n- {}", errors.join("\n- ")))
}
