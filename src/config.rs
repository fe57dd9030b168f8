//! Configuration value consumed by the orchestration kernel.
//!
//! The core never discovers or parses configuration itself — that is an
//! explicit non-goal (CLI flag parsing and configuration-file loading are
//! the CLI layer's job). `Config` is a plain, already-populated value; the
//! `from_toml_str` / `from_file` helpers below exist only as a convenience
//! for callers that happen to store their configuration as TOML, without
//! the env/CLI precedence chain that belongs outside the core.

use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::{AppResult, config_error};

/// Top-level configuration: database, polling, watch, and performance
/// sections.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database:    DatabaseConfig,
    pub polling:     PollingConfig,
    pub watch:       WatchConfig,
    pub performance: PerformanceConfig
}

/// Store location and retention policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path:             String,
    pub enable_wal:       bool,
    pub max_history_days: u32
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:             "sidequest.db".to_string(),
            enable_wal:       true,
            max_history_days: 30
        }
    }
}

/// Scheduler behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub default_frequency_ms:  u64,
    pub max_concurrent_checks: usize,
    pub adaptive_polling:      bool
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_frequency_ms:  60_000,
            max_concurrent_checks: 3,
            adaptive_polling:      true
        }
    }
}

/// Watch-mode controller behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_ms:  u64,
    pub debounce_ms:  u64,
    pub auto_cleanup: bool
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms:  3_000,
            debounce_ms:  250,
            auto_cleanup: true
        }
    }
}

/// Batch sizing and metrics emission.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub batch_size:     usize,
    pub enable_metrics: bool
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size:     500,
            enable_metrics: true
        }
    }
}

impl Config {
    /// Parse a configuration value from a TOML string.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| config_error(format!("invalid configuration: {e}")))
    }

    /// Read and parse a configuration value from a TOML file on disk.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| config_error(format!("failed to read '{}': {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.polling.max_concurrent_checks, 3);
        assert_eq!(config.watch.interval_ms, 3_000);
        assert!(config.database.enable_wal);
    }

    #[test]
    fn from_toml_str_overrides_selected_fields() {
        let config = Config::from_toml_str(
            r#"
            [polling]
            max_concurrent_checks = 8

            [watch]
            interval_ms = 5000
            "#
        )
        .unwrap();
        assert_eq!(config.polling.max_concurrent_checks, 8);
        assert_eq!(config.watch.interval_ms, 5_000);
        assert_eq!(config.database.max_history_days, 30);
    }

    #[test]
    fn from_toml_str_rejects_malformed_input() {
        let result = Config::from_toml_str("not valid toml {{{");
        assert!(result.is_err());
    }

    #[test]
    fn from_file_reports_missing_path() {
        let result = Config::from_file("/nonexistent/sidequest.toml");
        assert!(result.is_err());
    }
}
