//! Per-step ACL cache (`.gap/acl/<step>.json`).
//!
//! The cache pins the envelope to the exact content that was approved via a
//! SHA-256 digest. A cache whose digest no longer matches the live artifact
//! is ignored and the envelope is re-extracted from the artifact.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::atomic::write_atomic;
use super::paths::GapPaths;
use crate::core::acl::{AclContext, AclEnforcer};
use crate::manifest::Manifest;

/// Cached envelope plus the digest of the content it was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclCache {
    #[serde(flatten)]
    pub context: AclContext,
    pub source_sha256: String,
}

/// Hex SHA-256 of artifact content.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Write the cache for content that is about to become live.
pub fn write_cache(path: &Path, context: &AclContext, content: &str) -> Result<()> {
    let cache = AclCache {
        context: context.clone(),
        source_sha256: content_digest(content),
    };
    let mut buf = serde_json::to_string_pretty(&cache).context("serialize acl cache")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(path = %path.display(), writes = context.allowed_write_patterns.len(), execs = context.allowed_exec_prefixes.len(), "acl cache written");
    Ok(())
}

/// Read a cache file. A missing file is `None`.
pub fn load_cache(path: &Path) -> Result<Option<AclCache>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read acl cache {}", path.display()))?;
    let cache = serde_json::from_str(&contents)
        .with_context(|| format!("parse acl cache {}", path.display()))?;
    Ok(Some(cache))
}

/// Enforcer governed by a step's approved artifact.
pub fn load_for_step(paths: &GapPaths, manifest: &Manifest, step_id: &str) -> Result<AclEnforcer> {
    let step = manifest
        .step(step_id)
        .ok_or_else(|| anyhow!("unknown step '{step_id}'"))?;
    let live = paths.live_artifact(step);
    let content = match fs::read_to_string(&live) {
        Ok(content) => content,
        Err(err) => {
            debug!(step = step_id, path = %live.display(), error = %err, "no live artifact; denying all");
            return Ok(AclEnforcer::deny_all());
        }
    };

    let cache_path = paths.acl_cache(step_id);
    match load_cache(&cache_path) {
        Ok(Some(cache)) if cache.source_sha256 == content_digest(&content) => {
            debug!(step = step_id, "using cached acl");
            return Ok(AclEnforcer::new(cache.context));
        }
        Ok(Some(_)) => {
            debug!(step = step_id, "acl cache is stale; re-extracting");
        }
        Ok(None) => {}
        Err(err) => {
            warn!(step = step_id, error = %format!("{err:#}"), "acl cache unreadable; re-extracting");
        }
    }
    Ok(AclEnforcer::from_content(&content))
}
