//! Shared deterministic types for gate core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

/// Resolved status of a single manifest step.
///
/// Always derived from current external state; the ledger never stores the
/// authoritative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Dependencies not met.
    Locked,
    /// Dependencies met, no live artifact and no proposal yet.
    Unlocked,
    /// Proposal staged, waiting for the gate.
    Pending,
    /// Live artifact exists and every dependency is complete.
    Complete,
    /// Live artifact exists but some dependency is not complete (drift).
    Invalid,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Locked => "locked",
            StepStatus::Unlocked => "unlocked",
            StepStatus::Pending => "pending",
            StepStatus::Complete => "complete",
            StepStatus::Invalid => "invalid",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "locked" => Some(StepStatus::Locked),
            "unlocked" => Some(StepStatus::Unlocked),
            "pending" => Some(StepStatus::Pending),
            "complete" => Some(StepStatus::Complete),
            "invalid" => Some(StepStatus::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted provenance for one ledger key (a step id or a checkpoint key).
///
/// Older documents may omit the timestamp or approver, or carry a timestamp
/// without an offset; those still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub status: StepStatus,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
}

/// Parse an RFC 3339 timestamp. A timestamp without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
    }
}

/// Resolved state for one step: status plus provenance when proven complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepState {
    pub status: StepStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub approver: Option<String>,
}

impl StepState {
    pub fn bare(status: StepStatus) -> Self {
        Self {
            status,
            timestamp: None,
            approver: None,
        }
    }
}

/// Result of one resolution pass, keyed by step id in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusMap {
    entries: Vec<(String, StepState)>,
}

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, step_id: &str) -> Option<&StepState> {
        self.entries
            .iter()
            .find(|(id, _)| id == step_id)
            .map(|(_, state)| state)
    }

    pub fn status(&self, step_id: &str) -> Option<StepStatus> {
        self.get(step_id).map(|state| state.status)
    }

    /// Insert a step state. A repeated id keeps its first resolution.
    pub fn insert(&mut self, step_id: impl Into<String>, state: StepState) {
        let step_id = step_id.into();
        if self.get(&step_id).is_none() {
            self.entries.push((step_id, state));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepState)> {
        self.entries.iter().map(|(id, state)| (id.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Severity of a collected finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A structural problem found by validation or audit. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub message: String,
    pub severity: Severity,
}

impl Finding {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        write!(f, "[{label}] {}", self.message)
    }
}

/// True if any finding has error severity.
pub fn has_errors(findings: &[Finding]) -> bool {
    findings.iter().any(Finding::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_stored_spellings() {
        assert_eq!(StepStatus::parse("complete"), Some(StepStatus::Complete));
        assert_eq!(StepStatus::parse(" COMPLETE "), Some(StepStatus::Complete));
        assert_eq!(StepStatus::parse("done"), None);
    }

    #[test]
    fn status_map_keeps_first_resolution_of_repeated_id() {
        let mut map = StatusMap::new();
        map.insert("a", StepState::bare(StepStatus::Unlocked));
        map.insert("a", StepState::bare(StepStatus::Complete));
        assert_eq!(map.len(), 1);
        assert_eq!(map.status("a"), Some(StepStatus::Unlocked));
    }

    /// Verifies offset-free timestamps (as older ledgers wrote them) load as UTC.
    #[test]
    fn naive_timestamps_are_taken_as_utc() {
        let parsed = parse_timestamp("2025-01-02T03:04:05.123456").expect("naive");
        assert_eq!(
            parsed.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            "2025-01-02T03:04:05.123456Z"
        );
        assert!(parse_timestamp("2025-01-02 03:04:05").is_some());
        assert!(parse_timestamp("2025-01-02T03:04:05+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    /// Verifies records written without provenance fields still deserialize.
    #[test]
    fn record_fields_beyond_status_are_optional() {
        let record: LedgerRecord = serde_yaml::from_str("status: complete\n").expect("record");
        assert_eq!(record.status, StepStatus::Complete);
        assert_eq!(record.timestamp, None);
        assert_eq!(record.approver, None);

        let naive: LedgerRecord =
            serde_yaml::from_str("status: complete\ntimestamp: '2025-01-02T03:04:05'\napprover: alice\n")
                .expect("naive record");
        assert!(naive.timestamp.is_some());
        assert_eq!(naive.approver.as_deref(), Some("alice"));
    }

    #[test]
    fn finding_display_includes_severity_label() {
        assert_eq!(
            Finding::warning("orphan").to_string(),
            "[WARNING] orphan".to_string()
        );
    }
}
