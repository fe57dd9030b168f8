//! Append-only JSON-lines error log at `<cwd>/.sidequest-logs/watch-errors.log`.

use std::{
    io::Write,
    path::{Path, PathBuf}
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppResult, storage_error};

const LOG_DIR: &str = ".sidequest-logs";
const LOG_FILE: &str = "watch-errors.log";

/// One JSONL record.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub timestamp:    DateTime<Utc>,
    pub error:        String,
    pub stack:        Option<String>,
    #[serde(rename = "checksCount")]
    pub checks_count: i64,
    pub phase:        String,
    pub cwd:          String,
    #[serde(rename = "nodeVersion")]
    pub runtime_version: String,
    pub platform:        String
}

impl ErrorLogEntry {
    pub fn new(error: impl Into<String>, phase: impl Into<String>, checks_count: i64, cwd: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            error: error.into(),
            stack: None,
            checks_count,
            phase: phase.into(),
            cwd: cwd.into(),
            runtime_version: env!("RUSTC_VERSION").to_string(),
            platform: std::env::consts::OS.to_string()
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Appends one JSON object per line to `<cwd>/.sidequest-logs/watch-errors.log`,
/// creating the directory and file on first use.
pub struct ErrorLog {
    path: PathBuf
}

impl ErrorLog {
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            path: cwd.as_ref().join(LOG_DIR).join(LOG_FILE)
        }
    }

    pub fn append(&self, entry: &ErrorLogEntry) -> AppResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|e| storage_error(format!("failed to create error log directory: {e}")))?;

        let line = serde_json::to_string(entry)
            .map_err(|e| storage_error(format!("failed to serialize error log entry: {e}")))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| storage_error(format!("failed to open error log file: {e}")))?;
        writeln!(file, "{line}").map_err(|e| storage_error(format!("failed to write error log entry: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path());
        let entry = ErrorLogEntry::new("boom", "analyzing", 3, dir.path().display().to_string());
        log.append(&entry).unwrap();

        let content = std::fs::read_to_string(dir.path().join(LOG_DIR).join(LOG_FILE)).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"checksCount\":3"));
        assert!(content.contains("\"phase\":\"analyzing\""));
    }

    #[test]
    fn append_is_additive_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let log = ErrorLog::new(dir.path());
        for i in 0..3 {
            let entry = ErrorLogEntry::new(format!("error {i}"), "analyzing", i, dir.path().display().to_string());
            log.append(&entry).unwrap();
        }
        let content = std::fs::read_to_string(dir.path().join(LOG_DIR).join(LOG_FILE)).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn with_stack_sets_optional_field() {
        let entry = ErrorLogEntry::new("boom", "starting", 0, "/repo").with_stack("at foo()");
        assert_eq!(entry.stack.as_deref(), Some("at foo()"));
    }

    #[test]
    fn node_version_field_carries_the_actual_toolchain_version() {
        let entry = ErrorLogEntry::new("boom", "starting", 0, "/repo");
        assert!(entry.runtime_version.to_lowercase().contains("rustc"));
    }
}
