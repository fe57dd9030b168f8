//! Watch-session file persistence: atomic write-then-rename and the
//! resumability check used to decide whether a prior session continues.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{
    domain::{CriticalFlags, SessionError, WatchSession},
    error::{AppResult, storage_error}
};

const MAX_RECENT_ERRORS: usize = 10;
const RESUMABLE_MAX_AGE_HOURS: i64 = 24;
const RESUMABLE_MAX_RECENT_ERRORS: usize = 4;
const RECENT_ERROR_WINDOW_SECS: i64 = 5 * 60;

/// Reads and atomically rewrites `<data_dir>/watch-session.json`.
pub struct SessionStore {
    path: PathBuf
}

impl SessionStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join("watch-session.json")
        }
    }

    /// Load the persisted session, if the file exists and parses.
    pub fn load(&self) -> AppResult<Option<WatchSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| storage_error(format!("failed to read session file: {e}")))?;
        let session = serde_json::from_str(&content)
            .map_err(|e| storage_error(format!("failed to parse session file: {e}")))?;
        Ok(Some(session))
    }

    /// Write `session` to a temp file in the same directory, then rename
    /// over the real path — a concurrent writer could still race the
    /// rename, but each individual write is all-or-nothing.
    pub fn save(&self, session: &WatchSession) -> AppResult<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .map_err(|e| storage_error(format!("failed to create session directory: {e}")))?;

        let tmp_path = parent.join(format!(
            ".watch-session.json.tmp.{}",
            std::process::id()
        ));
        let content = serde_json::to_string_pretty(session)
            .map_err(|e| storage_error(format!("failed to serialize session: {e}")))?;
        std::fs::write(&tmp_path, content)
            .map_err(|e| storage_error(format!("failed to write session temp file: {e}")))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| storage_error(format!("failed to rename session file into place: {e}")))?;
        Ok(())
    }

    /// Truncate the session file (used on a clean shutdown that requests
    /// explicit session clearing).
    pub fn clear(&self) -> AppResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| storage_error(format!("failed to remove session file: {e}")))?;
        }
        Ok(())
    }
}

/// Append `error` to `session.errors`, capped at the ten most recent.
pub fn record_session_error(session: &mut WatchSession, message: String, phase: &str) {
    session.errors.push(SessionError {
        timestamp: Utc::now(),
        message,
        phase: phase.to_string()
    });
    if session.errors.len() > MAX_RECENT_ERRORS {
        let overflow = session.errors.len() - MAX_RECENT_ERRORS;
        session.errors.drain(0..overflow);
    }
}

/// A session is resumable iff: `lastUpdate` is ≤ 24h old, the recorded
/// working directory matches `cwd`, the recorded critical flags match
/// `flags`, and fewer than 4 errors occurred in the last 5 minutes.
pub fn is_resumable(session: &WatchSession, cwd: &str, flags: &CriticalFlags, now: DateTime<Utc>) -> bool {
    let last_update = session.session_end.unwrap_or(session.session_start);
    if (now - last_update).num_hours() > RESUMABLE_MAX_AGE_HOURS {
        return false;
    }
    if session.working_directory != cwd {
        return false;
    }
    if &session.critical_flags != flags {
        return false;
    }
    let recent_errors = session
        .errors
        .iter()
        .filter(|e| (now - e.timestamp).num_seconds() <= RECENT_ERROR_WINDOW_SECS)
        .count();
    if recent_errors >= RESUMABLE_MAX_RECENT_ERRORS {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(cwd: &str, flags: CriticalFlags) -> WatchSession {
        WatchSession {
            id: 1,
            session_start: Utc::now(),
            session_end: None,
            total_checks: 0,
            total_violations_start: 0,
            total_violations_end: 0,
            configuration: serde_json::json!({}),
            errors: Vec::new(),
            working_directory: cwd.to_string(),
            critical_flags: flags
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let s = session("/repo", CriticalFlags::default());
        store.save(&s).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.working_directory, "/repo");
    }

    #[test]
    fn load_returns_none_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn resumable_matches_cwd_and_flags_within_window() {
        let s = session("/repo", CriticalFlags {
            target_path: "/repo/src".to_string(),
            strict: true,
            eslint_only: false
        });
        let now = s.session_start;
        assert!(is_resumable(
            &s,
            "/repo",
            &CriticalFlags {
                target_path: "/repo/src".to_string(),
                strict: true,
                eslint_only: false
            },
            now
        ));
    }

    #[test]
    fn not_resumable_on_flag_mismatch() {
        let s = session("/repo", CriticalFlags {
            target_path: "/repo/src".to_string(),
            strict: false,
            eslint_only: false
        });
        let now = s.session_start;
        assert!(!is_resumable(
            &s,
            "/repo",
            &CriticalFlags {
                target_path: "/repo/src".to_string(),
                strict: true,
                eslint_only: false
            },
            now
        ));
    }

    #[test]
    fn not_resumable_after_24_hours() {
        let mut s = session("/repo", CriticalFlags::default());
        s.session_start = Utc::now() - chrono::Duration::hours(25);
        let now = Utc::now();
        assert!(!is_resumable(&s, "/repo", &CriticalFlags::default(), now));
    }

    #[test]
    fn not_resumable_with_four_or_more_recent_errors() {
        let mut s = session("/repo", CriticalFlags::default());
        let now = Utc::now();
        for _ in 0..4 {
            record_session_error(&mut s, "boom".to_string(), "analyzing");
        }
        assert!(!is_resumable(&s, "/repo", &CriticalFlags::default(), now));
    }

    #[test]
    fn error_list_is_capped_at_ten() {
        let mut s = session("/repo", CriticalFlags::default());
        for i in 0..15 {
            record_session_error(&mut s, format!("error {i}"), "analyzing");
        }
        assert_eq!(s.errors.len(), 10);
        assert_eq!(s.errors[0].message, "error 5");
    }
}
