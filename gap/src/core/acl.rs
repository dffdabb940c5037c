//! Access control envelopes embedded in approved artifacts.
//!
//! An artifact grants the next phase its capabilities through a fenced YAML
//! (or JSON) block under an `Access Control`, `ACL` or `Governance` heading:
//!
//! ~~~markdown
//! ## Access Control
//! ```yaml
//! allow_write:
//!   - "src/*.rs"
//! allow_exec:
//!   - "cargo test"
//! ```
//! ~~~
//!
//! Extraction fails closed: no section, no block, or an unparseable block all
//! yield an empty envelope that permits nothing.

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::markdown::{Block, blocks, is_structured_info};

const SECTION_NAMES: [&str; 3] = ["access control", "acl", "governance"];

/// A write or exec request outside the current envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("write denied: '{path}' is not permitted by the access control list")]
    Write { path: String },
    #[error("exec denied: '{command}' is not permitted by the access control list")]
    Exec { command: String },
}

/// Ordered write globs and exec prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclContext {
    #[serde(rename = "allow_write", default)]
    pub allowed_write_patterns: Vec<String>,
    #[serde(rename = "allow_exec", default)]
    pub allowed_exec_prefixes: Vec<String>,
}

impl AclContext {
    pub fn is_empty(&self) -> bool {
        self.allowed_write_patterns.is_empty() && self.allowed_exec_prefixes.is_empty()
    }
}

/// Extract the envelope from artifact text.
pub fn extract_acl(content: &str) -> AclContext {
    match find_acl_block(content) {
        Some(block) => parse_block(&block),
        None => {
            debug!("no access control block found");
            AclContext::default()
        }
    }
}

/// Body of the first structured fenced block inside a matching section.
fn find_acl_block(content: &str) -> Option<String> {
    let mut in_section = false;
    for block in blocks(content) {
        match block {
            Block::Heading(text) => in_section = is_acl_heading(&text),
            Block::Fence { info, body } if in_section && is_structured_info(&info) => {
                return Some(body);
            }
            Block::Fence { .. } => {}
        }
    }
    None
}

fn is_acl_heading(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    SECTION_NAMES.iter().any(|name| {
        lowered
            .strip_prefix(name)
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_alphanumeric()))
    })
}

fn parse_block(block: &str) -> AclContext {
    if block.trim().is_empty() {
        return AclContext::default();
    }
    match serde_yaml::from_str::<AclContext>(block) {
        Ok(context) => context,
        Err(err) => {
            warn!(error = %err, "unparseable access control block; denying everything");
            AclContext::default()
        }
    }
}

/// Collapse `.`, `..` and repeated separators; `\` is treated as `/`.
///
/// Leading `..` segments are kept so callers can see the path escapes.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Evaluates candidate writes and commands against one envelope.
#[derive(Debug, Clone)]
pub struct AclEnforcer {
    context: AclContext,
    write_matchers: Vec<(String, Option<GlobMatcher>)>,
}

impl AclEnforcer {
    pub fn new(context: AclContext) -> Self {
        let write_matchers = context
            .allowed_write_patterns
            .iter()
            .map(|pattern| (pattern.clone(), compile_pattern(pattern)))
            .collect();
        Self {
            context,
            write_matchers,
        }
    }

    pub fn from_content(content: &str) -> Self {
        Self::new(extract_acl(content))
    }

    /// An enforcer that denies every request.
    pub fn deny_all() -> Self {
        Self::new(AclContext::default())
    }

    pub fn context(&self) -> &AclContext {
        &self.context
    }

    /// Permit `path` if it matches any write pattern, in declared order.
    pub fn validate_write(&self, path: &str) -> Result<(), AccessDenied> {
        let normalized = normalize_path(path);
        if !escapes_root(&normalized) {
            let hit = self.write_matchers.iter().find(|(_, matcher)| {
                matcher
                    .as_ref()
                    .is_some_and(|matcher| matcher.is_match(&normalized))
            });
            if let Some((pattern, _)) = hit {
                debug!(path = %normalized, pattern = %pattern, "write permitted");
                return Ok(());
            }
        }
        Err(AccessDenied::Write {
            path: path.to_string(),
        })
    }

    /// Permit `command` if it equals or starts with any allowed prefix.
    pub fn validate_exec(&self, command: &str) -> Result<(), AccessDenied> {
        let permitted = self
            .context
            .allowed_exec_prefixes
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .any(|prefix| command == prefix.as_str() || command.starts_with(prefix.as_str()));
        if permitted {
            debug!(command = %command, "exec permitted");
            return Ok(());
        }
        Err(AccessDenied::Exec {
            command: command.to_string(),
        })
    }
}

/// A normalized path leaves the project when it climbs above it or names an
/// absolute location (`/etc`, `C:/Windows`, `//server/share`).
fn escapes_root(normalized: &str) -> bool {
    if normalized == ".." || normalized.starts_with("../") || normalized.starts_with('/') {
        return true;
    }
    let mut chars = normalized.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    )
}

fn compile_pattern(pattern: &str) -> Option<GlobMatcher> {
    let normalized = normalize_path(pattern);
    match GlobBuilder::new(&normalized).literal_separator(true).build() {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(err) => {
            warn!(pattern = %pattern, error = %err, "invalid write pattern never matches");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESIGN: &str = "# Design\n\nSome prose.\n\n## Access Control\n\n```yaml\nallow_write:\n  - \"src/*.py\"\n  - \"docs/*.md\"\nallow_exec:\n  - \"pytest\"\n  - \"git status\"\n```\n";

    #[test]
    fn extracts_lists_in_declared_order() {
        let acl = extract_acl(DESIGN);
        assert_eq!(acl.allowed_write_patterns, vec!["src/*.py", "docs/*.md"]);
        assert_eq!(acl.allowed_exec_prefixes, vec!["pytest", "git status"]);
    }

    #[test]
    fn glob_semantics_respect_segments() {
        let enforcer = AclEnforcer::from_content(DESIGN);
        assert!(enforcer.validate_write("src/auth.py").is_ok());
        assert!(enforcer.validate_write("./src/auth.py").is_ok());
        assert!(enforcer.validate_write("docs/api.md").is_ok());
        assert_eq!(
            enforcer.validate_write("src/sub/auth.py"),
            Err(AccessDenied::Write {
                path: "src/sub/auth.py".to_string()
            })
        );
        assert!(enforcer.validate_write("docs/readme.txt").is_err());
    }

    #[test]
    fn double_star_and_question_mark() {
        let enforcer = AclEnforcer::new(AclContext {
            allowed_write_patterns: vec!["tests/**".to_string(), "lib/?.rs".to_string()],
            allowed_exec_prefixes: Vec::new(),
        });
        assert!(enforcer.validate_write("tests/unit/deep/a.rs").is_ok());
        assert!(enforcer.validate_write("lib/a.rs").is_ok());
        assert!(enforcer.validate_write("lib/ab.rs").is_err());
    }

    #[test]
    fn paths_escaping_the_root_are_denied() {
        let enforcer = AclEnforcer::new(AclContext {
            allowed_write_patterns: vec!["**".to_string()],
            allowed_exec_prefixes: Vec::new(),
        });
        assert!(enforcer.validate_write("src/../README.md").is_ok());
        assert!(enforcer.validate_write("../outside.md").is_err());
        assert!(enforcer.validate_write("src/../../outside.md").is_err());
    }

    /// Verifies absolute locations are denied even under a catch-all pattern.
    #[test]
    fn absolute_paths_are_denied() {
        let enforcer = AclEnforcer::new(AclContext {
            allowed_write_patterns: vec!["**".to_string()],
            allowed_exec_prefixes: Vec::new(),
        });
        assert_eq!(
            enforcer.validate_write("/etc/passwd"),
            Err(AccessDenied::Write {
                path: "/etc/passwd".to_string()
            })
        );
        assert!(enforcer.validate_write("/").is_err());
        assert!(enforcer.validate_write("C:\\Windows\\system.ini").is_err());
        assert!(enforcer.validate_write("d:/data.txt").is_err());
        assert!(enforcer.validate_write("src/main.rs").is_ok());
    }

    #[test]
    fn single_pattern_denies_other_directories() {
        let enforcer = AclEnforcer::new(AclContext {
            allowed_write_patterns: vec!["src/*.py".to_string()],
            allowed_exec_prefixes: Vec::new(),
        });
        assert!(enforcer.validate_write("src/auth.py").is_ok());
        assert!(enforcer.validate_write("docs/readme.md").is_err());
    }

    #[test]
    fn exec_matches_exact_or_prefix() {
        let enforcer = AclEnforcer::from_content(DESIGN);
        assert!(enforcer.validate_exec("pytest").is_ok());
        assert!(enforcer.validate_exec("pytest -k auth").is_ok());
        assert!(enforcer.validate_exec("git status --short").is_ok());
        assert_eq!(
            enforcer.validate_exec("rm -rf /"),
            Err(AccessDenied::Exec {
                command: "rm -rf /".to_string()
            })
        );
    }

    #[test]
    fn missing_section_denies_everything() {
        let enforcer = AclEnforcer::from_content("# Notes\n\n```yaml\nallow_write: ['**']\n```\n");
        assert!(enforcer.context().is_empty());
        assert!(enforcer.validate_write("anything.txt").is_err());
        assert!(enforcer.validate_exec("ls").is_err());
    }

    #[test]
    fn malformed_block_denies_everything() {
        let enforcer =
            AclEnforcer::from_content("## ACL\n```yaml\nallow_write: [unterminated\n```\n");
        assert!(enforcer.context().is_empty());
    }

    #[test]
    fn heading_match_is_case_insensitive_and_skips_other_fences() {
        let content = "### governance (phase 2)\n\n```bash\necho hi\n```\n\n'''yml\nallow_exec: [make]\n'''\n";
        assert_eq!(extract_acl(content).allowed_exec_prefixes, vec!["make"]);
    }

    #[test]
    fn block_outside_section_is_ignored() {
        let content = "## ACL\n\nNo block here.\n\n## Appendix\n\n```yaml\nallow_exec: [make]\n```\n";
        assert!(extract_acl(content).is_empty());
    }

    #[test]
    fn normalize_collapses_segments() {
        assert_eq!(normalize_path("./a//b/./c"), "a/b/c");
        assert_eq!(normalize_path("a\\b\\..\\c"), "a/c");
        assert_eq!(normalize_path("../x"), "../x");
        assert_eq!(normalize_path("/tmp/../etc"), "/etc");
    }

    #[test]
    fn empty_exec_prefix_never_matches() {
        let enforcer = AclEnforcer::new(AclContext {
            allowed_write_patterns: Vec::new(),
            allowed_exec_prefixes: vec![String::new()],
        });
        assert!(enforcer.validate_exec("anything").is_err());
    }
}
