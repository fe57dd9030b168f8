//! Core domain types shared by every component: the external violation
//! input record, the stored [`Violation`], and the bookkeeping entities
//! (`RuleCheck`, `ViolationHistory`, `RuleSchedule`, `WatchSession`,
//! `PerformanceMetric`) that track how violations evolve across runs.

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, validation_error};

/// Severity level reported by an analysis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
    Info
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info"
        })
    }
}

impl std::str::FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            other => Err(validation_error(format!("unknown severity '{other}'")))
        }
    }
}

/// The analysis engine that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    Typechecker,
    Linter,
    UnusedExports,
    Schema
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Typechecker => "typechecker",
            Self::Linter => "linter",
            Self::UnusedExports => "unused-exports",
            Self::Schema => "schema"
        })
    }
}

impl std::str::FromStr for Source {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "typechecker" => Ok(Self::Typechecker),
            "linter" => Ok(Self::Linter),
            "unused-exports" => Ok(Self::UnusedExports),
            "schema" => Ok(Self::Schema),
            other => Err(validation_error(format!("unknown source '{other}'")))
        }
    }
}

/// Lifecycle status of a stored [`Violation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationStatus {
    Active,
    Resolved,
    Ignored
}

impl std::fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Ignored => "ignored"
        })
    }
}

impl std::str::FromStr for ViolationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "resolved" => Ok(Self::Resolved),
            "ignored" => Ok(Self::Ignored),
            other => Err(validation_error(format!("unknown violation status '{other}'")))
        }
    }
}

/// Terminal/non-terminal status of a [`RuleCheck`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Running,
    Completed,
    Failed,
    Timeout
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout"
        })
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            other => Err(validation_error(format!("unknown check status '{other}'")))
        }
    }
}

/// What happened to a violation between two consecutive checks of the same
/// rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    Added,
    Removed,
    Modified,
    Unchanged
}

impl std::fmt::Display for DeltaAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged"
        })
    }
}

impl std::str::FromStr for DeltaAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(Self::Added),
            "removed" => Ok(Self::Removed),
            "modified" => Ok(Self::Modified),
            "unchanged" => Ok(Self::Unchanged),
            other => Err(validation_error(format!("unknown delta action '{other}'")))
        }
    }
}

/// A single finding reported by an analysis engine, as handed to the
/// [`crate::tracker::ViolationTracker`] before validation, sanitization, or
/// hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationInput {
    pub file:     String,
    pub line:     Option<i64>,
    pub column:   Option<i64>,
    pub message:  String,
    pub category: String,
    pub severity: Severity,
    pub source:   Source,
    pub rule:     Option<String>,
    pub code:     Option<String>
}

/// The stored, deduplicated state of a finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub id:            Option<i64>,
    pub file_path:     CompactString,
    pub rule_id:       CompactString,
    pub category:      CompactString,
    pub severity:      Severity,
    pub source:        Source,
    pub message:       CompactString,
    pub line:          Option<i64>,
    pub column:        Option<i64>,
    pub code_snippet:  Option<CompactString>,
    pub hash:          String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at:  DateTime<Utc>,
    pub status:        ViolationStatus
}

/// One invocation of one rule by one engine.
#[derive(Debug, Clone)]
pub struct RuleCheck {
    pub id:                   i64,
    pub rule_id:              String,
    pub engine:               String,
    pub started_at:           DateTime<Utc>,
    pub completed_at:         Option<DateTime<Utc>>,
    pub status:               CheckStatus,
    pub violations_found:     Option<i64>,
    pub execution_time_ms:    Option<i64>,
    pub error_message:        Option<String>,
    pub files_checked:        Option<i64>,
    pub files_with_violations: Option<i64>
}

/// Per-check delta event recorded against a [`RuleCheck`].
#[derive(Debug, Clone)]
pub struct ViolationHistoryEntry {
    pub id:               i64,
    pub check_id:         i64,
    pub violation_hash:   String,
    pub action:           DeltaAction,
    pub previous_line:    Option<i64>,
    pub previous_message: Option<String>,
    pub recorded_at:      DateTime<Utc>
}

/// Adaptive scheduling state for a (rule, engine) pair.
#[derive(Debug, Clone)]
pub struct RuleSchedule {
    pub id:                    i64,
    pub rule_id:               String,
    pub engine:                String,
    pub enabled:               bool,
    pub priority:              i64,
    pub check_frequency_ms:    i64,
    pub last_run_at:           Option<DateTime<Utc>>,
    pub next_run_at:           Option<DateTime<Utc>>,
    pub consecutive_zero_count: i64,
    pub avg_execution_time_ms: f64,
    pub avg_violations_found:  f64
}

/// One continuous run of watch mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSession {
    pub id:                     i64,
    pub session_start:         DateTime<Utc>,
    pub session_end:           Option<DateTime<Utc>>,
    pub total_checks:          i64,
    pub total_violations_start: i64,
    pub total_violations_end:  i64,
    pub configuration:         serde_json::Value,
    pub errors:                Vec<SessionError>,
    /// Not persisted under this name in SQLite (derived from `errors`),
    /// kept here so the JSON session file round-trips the working
    /// directory and critical flags used by resumability checks.
    #[serde(default)]
    pub working_directory:     String,
    #[serde(default)]
    pub critical_flags:        CriticalFlags
}

/// One recorded failure inside a [`WatchSession`], capped at the ten most
/// recent entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub timestamp: DateTime<Utc>,
    pub message:   String,
    pub phase:     String
}

/// The subset of configuration flags that must match for a watch session
/// to be resumable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalFlags {
    pub target_path: String,
    pub strict:      bool,
    pub eslint_only:  bool
}

/// A time-series observability point.
#[derive(Debug, Clone)]
pub struct PerformanceMetric {
    pub id:           i64,
    pub metric_type:  String,
    pub metric_value: f64,
    pub metric_unit:  String,
    pub context:      Option<String>,
    pub recorded_at:  DateTime<Utc>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_display_and_from_str() {
        for s in [Severity::Error, Severity::Warn, Severity::Info] {
            let parsed: Severity = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn source_round_trips_through_display_and_from_str() {
        for s in [
            Source::Typechecker,
            Source::Linter,
            Source::UnusedExports,
            Source::Schema
        ] {
            let parsed: Source = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn unknown_severity_is_a_validation_error() {
        let result: Result<Severity, _> = "critical".parse();
        assert!(result.is_err());
    }
}
