//! Project configuration stored under `.gap/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;

/// Environment variable naming the SQLite ledger location.
pub const DB_URL_ENV: &str = "GAP_DB_URL";

/// Gate configuration (TOML).
///
/// Edited by humans; every field is optional and missing fields take the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GapConfig {
    /// Approver name recorded when a command is not given one explicitly.
    pub approver: String,

    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Yaml,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,

    /// SQLite database path, relative to the project root.
    pub database: PathBuf,

    /// Project name in the relational ledger. Defaults to the manifest name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Yaml,
            database: PathBuf::from(".gap/ledger.db"),
            project: None,
        }
    }
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            approver: "user".to_string(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl GapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.approver.trim().is_empty() {
            return Err(anyhow!("approver must not be empty"));
        }
        if self.ledger.database.as_os_str().is_empty() {
            return Err(anyhow!("ledger.database must not be empty"));
        }
        if let Some(project) = &self.ledger.project {
            if project.trim().is_empty() {
                return Err(anyhow!("ledger.project must not be empty when set"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GapConfig::default()`.
pub fn load_config(path: &Path) -> Result<GapConfig> {
    if !path.exists() {
        let cfg = GapConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GapConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GapConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Turn a `sqlite://` URL or plain path into a filesystem path.
///
/// `sqlite:///abs/path` is absolute, `sqlite://rel/path` is relative.
pub fn database_path_from_url(url: &str) -> Result<PathBuf> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("database url must not be empty"));
    }
    if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(anyhow!("database url '{url}' has no path"));
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = trimmed.split_once("://") {
        return Err(anyhow!(
            "unsupported database scheme '{scheme}' (only sqlite is supported)"
        ));
    }
    Ok(PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verifies a missing config file yields defaults.
    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GapConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = GapConfig::default();
        cfg.ledger.backend = LedgerBackend::Sqlite;
        cfg.ledger.project = Some("demo".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[ledger]\nbackend = \"sqlite\"\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.ledger.backend, LedgerBackend::Sqlite);
        assert_eq!(cfg.approver, "user");
        assert_eq!(cfg.ledger.database, PathBuf::from(".gap/ledger.db"));
    }

    #[test]
    fn blank_approver_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "approver = \"  \"\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn database_urls_resolve_to_paths() {
        assert_eq!(
            database_path_from_url("sqlite:///tmp/ledger.db").expect("abs"),
            PathBuf::from("/tmp/ledger.db")
        );
        assert_eq!(
            database_path_from_url("sqlite://ledger.db").expect("rel"),
            PathBuf::from("ledger.db")
        );
        assert_eq!(
            database_path_from_url("data/ledger.db").expect("plain"),
            PathBuf::from("data/ledger.db")
        );
        assert!(database_path_from_url("postgres://host/db").is_err());
    }
}
