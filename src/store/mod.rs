//! The embedded relational store: schema, pragmas, and typed operations
//! over violations, rule checks, delta history, schedules, sessions, and
//! metrics.
//!
//! `rusqlite::Connection` is not `Sync`, and every call here is blocking
//! I/O, so the connection lives behind a `Mutex` and each public operation
//! runs its SQL on a blocking-pool thread via `tokio::task::spawn_blocking`
//! — giving callers suspension points to await without giving up the
//! single writer, single transaction-per-batch model.

mod schema;

use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering}
    }
};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use rusqlite::{Connection, OptionalExtension, Row, params};

use self::schema::{CURRENT_SCHEMA_VERSION, SCHEMA_SQL};
use crate::{
    config::DatabaseConfig,
    domain::{
        CheckStatus, CriticalFlags, DeltaAction, PerformanceMetric, RuleCheck, RuleSchedule,
        Severity, Source, Violation, ViolationHistoryEntry, ViolationStatus, WatchSession
    },
    error::{AppResult, fatal_error, storage_error}
};

/// Result of a batched upsert.
#[derive(Debug, Clone, Default)]
pub struct StoreResult {
    pub inserted: usize,
    pub updated:  usize,
    pub errors:   Vec<String>
}

/// Set differences computed by [`Store::record_violation_deltas`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaCounts {
    pub added:     usize,
    pub removed:   usize,
    pub unchanged: usize
}

/// Rows removed by [`Store::cleanup_old_data`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupResult {
    pub history_deleted: usize,
    pub metrics_deleted: usize
}

/// Embedded relational store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    /// Trips exactly one future `store_violations` call into a simulated
    /// failure; only ever set by `fail_next_store_violations_call` in
    /// tests exercising storage-failure isolation.
    fail_next_store: Arc<AtomicBool>
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text))
}

async fn run_blocking<T, F>(conn: Arc<Mutex<Connection>>, f: F) -> AppResult<T>
where
    F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
    T: Send + 'static
{
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().expect("store mutex poisoned");
        f(&guard)
    })
    .await
    .map_err(|e| storage_error(format!("store task panicked: {e}")))?
}

impl Store {
    /// Open (creating if absent) the embedded store at `config.path`,
    /// applying the configured pragmas and guarding on schema version.
    pub async fn open(config: &DatabaseConfig) -> AppResult<Self> {
        let path = config.path.clone();
        let enable_wal = config.enable_wal;
        tokio::task::spawn_blocking(move || Self::open_sync(&path, enable_wal))
            .await
            .map_err(|e| fatal_error(format!("store open task panicked: {e}")))?
    }

    /// In-memory store for tests; never persisted to disk.
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| fatal_error(format!("failed to open in-memory store: {e}")))?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fail_next_store: Arc::new(AtomicBool::new(false))
        })
    }

    fn open_sync(path: &str, enable_wal: bool) -> AppResult<Self> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|e| fatal_error(format!("failed to create store directory: {e}")))?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| fatal_error(format!("failed to open store at '{path}': {e}")))?;
        if enable_wal {
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(|e| fatal_error(format!("failed to enable WAL: {e}")))?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| fatal_error(format!("failed to set synchronous mode: {e}")))?;
        conn.pragma_update(None, "cache_size", -65536i64)
            .map_err(|e| fatal_error(format!("failed to set cache size: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| fatal_error(format!("failed to enable foreign keys: {e}")))?;
        conn.pragma_update(None, "temp_store", "MEMORY")
            .map_err(|e| fatal_error(format!("failed to set temp_store: {e}")))?;
        conn.pragma_update(None, "mmap_size", 134_217_728i64)
            .map_err(|e| fatal_error(format!("failed to set mmap_size: {e}")))?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fail_next_store: Arc::new(AtomicBool::new(false))
        })
    }

    fn initialize(conn: &Connection) -> AppResult<()> {
        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_meta LIMIT 1", [], |r| r.get(0))
            .optional()
            .unwrap_or(None);

        if version.is_none() {
            conn.execute_batch(SCHEMA_SQL)
                .map_err(|e| fatal_error(format!("failed to apply schema: {e}")))?;
            conn.execute(
                "INSERT INTO schema_meta (version) VALUES (?1)",
                params![CURRENT_SCHEMA_VERSION]
            )
            .map_err(|e| fatal_error(format!("failed to record schema version: {e}")))?;
            return Ok(());
        }

        let version = version.unwrap();
        if version != CURRENT_SCHEMA_VERSION {
            return Err(fatal_error(format!(
                "schema version mismatch: store has {version}, code expects \
                 {CURRENT_SCHEMA_VERSION}"
            )));
        }
        // Schema already applied at the matching version; DDL below is
        // idempotent (`IF NOT EXISTS`) so this is safe to re-run for
        // stores created before an index was added.
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| fatal_error(format!("failed to verify schema: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    // ---------------------------------------------------------------
    // Violations
    // ---------------------------------------------------------------

    /// Idempotent upsert keyed by `hash`. On conflict: bump `last_seen_at`,
    /// never overwrite `first_seen_at` or `status`. Never raises for a
    /// single bad row — failures go into `errors[]`.
    pub async fn store_violations(&self, violations: &[Violation]) -> AppResult<StoreResult> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(storage_error("simulated storage failure"));
        }
        let violations = violations.to_vec();
        run_blocking(self.conn(), move |conn| Self::store_violations_sync(conn, &violations)).await
    }

    /// Makes the next `store_violations` call return an error instead of
    /// touching the connection, then resets. Used to exercise storage-
    /// failure isolation without a trait seam around `rusqlite`.
    #[cfg(test)]
    pub fn fail_next_store_violations_call(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    fn store_violations_sync(conn: &Connection, violations: &[Violation]) -> AppResult<StoreResult> {
        let mut result = StoreResult::default();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| storage_error(format!("failed to start transaction: {e}")))?;
        for v in violations {
            if let Err(e) = Self::store_one_violation_sync(&tx, v, &mut result) {
                result.errors.push(format!("failed to store violation '{}': {e}", v.hash));
            }
        }
        tx.commit()
            .map_err(|e| storage_error(format!("failed to commit violation batch: {e}")))?;
        Ok(result)
    }

    fn store_one_violation_sync(
        tx: &rusqlite::Transaction<'_>,
        v: &Violation,
        result: &mut StoreResult
    ) -> rusqlite::Result<()> {
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM violations WHERE hash = ?1)",
                params![v.hash],
                |r| r.get(0)
            )?;
        if exists {
            tx.execute(
                "UPDATE violations SET last_seen_at = ?2 WHERE hash = ?1 AND last_seen_at < ?2",
                params![v.hash, to_rfc3339(v.last_seen_at)]
            )?;
            result.updated += 1;
        } else {
            tx.execute(
                "INSERT INTO violations
                    (file_path, rule_id, category, severity, source, message, line, column,
                     code_snippet, hash, first_seen_at, last_seen_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'active')",
                params![
                    v.file_path.as_str(),
                    v.rule_id.as_str(),
                    v.category.as_str(),
                    v.severity.to_string(),
                    v.source.to_string(),
                    v.message.as_str(),
                    v.line,
                    v.column,
                    v.code_snippet.as_ref().map(|s| s.as_str()),
                    v.hash,
                    to_rfc3339(v.first_seen_at),
                    to_rfc3339(v.last_seen_at)
                ]
            )?;
            result.inserted += 1;
        }
        Ok(())
    }

    /// Set `status = 'resolved'` for each matching active row.
    pub async fn resolve_violations(&self, hashes: &[String]) -> AppResult<usize> {
        self.set_status(hashes, ViolationStatus::Resolved).await
    }

    /// Set `status = 'ignored'` for each matching active row.
    pub async fn ignore_violations(&self, hashes: &[String]) -> AppResult<usize> {
        self.set_status(hashes, ViolationStatus::Ignored).await
    }

    /// Transition resolved/ignored violations back to `active`.
    pub async fn reactivate_violations(&self, hashes: &[String]) -> AppResult<usize> {
        let hashes = hashes.to_vec();
        run_blocking(self.conn(), move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| storage_error(format!("failed to start transaction: {e}")))?;
            let mut count = 0usize;
            for hash in &hashes {
                let changed = tx
                    .execute(
                        "UPDATE violations SET status = 'active' WHERE hash = ?1 AND status != \
                         'active'",
                        params![hash]
                    )
                    .map_err(|e| storage_error(format!("failed to reactivate '{hash}': {e}")))?;
                count += changed;
            }
            tx.commit()
                .map_err(|e| storage_error(format!("failed to commit reactivation: {e}")))?;
            Ok(count)
        })
        .await
    }

    async fn set_status(&self, hashes: &[String], status: ViolationStatus) -> AppResult<usize> {
        let hashes = hashes.to_vec();
        let status_str = status.to_string();
        run_blocking(self.conn(), move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| storage_error(format!("failed to start transaction: {e}")))?;
            let mut count = 0usize;
            for hash in &hashes {
                let changed = tx
                    .execute(
                        "UPDATE violations SET status = ?2 WHERE hash = ?1 AND status = 'active'",
                        params![hash, status_str]
                    )
                    .map_err(|e| storage_error(format!("failed to update '{hash}': {e}")))?;
                count += changed;
            }
            tx.commit()
                .map_err(|e| storage_error(format!("failed to commit status update: {e}")))?;
            Ok(count)
        })
        .await
    }

    /// Fetch a single violation by its hash, regardless of status.
    pub async fn get_violation_by_hash(&self, hash: &str) -> AppResult<Option<Violation>> {
        let hash = hash.to_string();
        run_blocking(self.conn(), move |conn| {
            conn.query_row(
                "SELECT id, file_path, rule_id, category, severity, source, message, line, \
                 column, code_snippet, hash, first_seen_at, last_seen_at, status FROM violations \
                 WHERE hash = ?1",
                params![hash],
                row_to_violation
            )
            .optional()
            .map_err(|e| storage_error(format!("failed to fetch violation: {e}")))
        })
        .await
    }

    /// All currently-active violations, optionally scoped to one rule.
    pub async fn list_active_violations(&self, rule_id: Option<&str>) -> AppResult<Vec<Violation>> {
        let rule_id = rule_id.map(|s| s.to_string());
        run_blocking(self.conn(), move |conn| {
            let mut stmt = if rule_id.is_some() {
                conn.prepare(
                    "SELECT id, file_path, rule_id, category, severity, source, message, line, \
                     column, code_snippet, hash, first_seen_at, last_seen_at, status FROM \
                     violations WHERE status = 'active' AND rule_id = ?1"
                )
            } else {
                conn.prepare(
                    "SELECT id, file_path, rule_id, category, severity, source, message, line, \
                     column, code_snippet, hash, first_seen_at, last_seen_at, status FROM \
                     violations WHERE status = 'active'"
                )
            }
            .map_err(|e| storage_error(format!("failed to prepare query: {e}")))?;

            let rows = if let Some(rid) = &rule_id {
                stmt.query_map(params![rid], row_to_violation)
            } else {
                stmt.query_map([], row_to_violation)
            }
            .map_err(|e| storage_error(format!("failed to query violations: {e}")))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| storage_error(format!("failed to read violations: {e}")))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Rule checks
    // ---------------------------------------------------------------

    /// Create a `RuleCheck` row in `running` status.
    pub async fn start_rule_check(&self, rule_id: &str, engine: &str) -> AppResult<i64> {
        let rule_id = rule_id.to_string();
        let engine = engine.to_string();
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "INSERT INTO rule_checks (rule_id, engine, started_at, status) VALUES (?1, ?2, \
                 ?3, 'running')",
                params![rule_id, engine, to_rfc3339(now())]
            )
            .map_err(|e| storage_error(format!("failed to start rule check: {e}")))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Transition a `RuleCheck` to `completed`.
    pub async fn complete_rule_check(
        &self,
        id: i64,
        found: i64,
        execution_time_ms: i64,
        files_checked: i64,
        files_with_violations: i64
    ) -> AppResult<()> {
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "UPDATE rule_checks SET status = 'completed', completed_at = ?2, \
                 violations_found = ?3, execution_time_ms = ?4, files_checked = ?5, \
                 files_with_violations = ?6 WHERE id = ?1",
                params![
                    id,
                    to_rfc3339(now()),
                    found,
                    execution_time_ms,
                    files_checked,
                    files_with_violations
                ]
            )
            .map_err(|e| storage_error(format!("failed to complete rule check {id}: {e}")))?;
            Ok(())
        })
        .await
    }

    /// Transition a `RuleCheck` to `failed` (or `timeout` via
    /// [`Store::timeout_rule_check`]).
    pub async fn fail_rule_check(&self, id: i64, message: &str) -> AppResult<()> {
        self.finish_rule_check_as(id, CheckStatus::Failed, message).await
    }

    /// Transition a `RuleCheck` to `timeout`.
    pub async fn timeout_rule_check(&self, id: i64) -> AppResult<()> {
        self.finish_rule_check_as(id, CheckStatus::Timeout, "execution deadline exceeded").await
    }

    async fn finish_rule_check_as(&self, id: i64, status: CheckStatus, message: &str) -> AppResult<()> {
        let status_str = status.to_string();
        let message = message.to_string();
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "UPDATE rule_checks SET status = ?2, completed_at = ?3, error_message = ?4 \
                 WHERE id = ?1",
                params![id, status_str, to_rfc3339(now()), message]
            )
            .map_err(|e| storage_error(format!("failed to finish rule check {id}: {e}")))?;
            Ok(())
        })
        .await
    }

    /// Fetch a rule check by id (used by tests and the scheduler for
    /// observing `started_at` when computing deltas).
    pub async fn get_rule_check(&self, id: i64) -> AppResult<Option<RuleCheck>> {
        run_blocking(self.conn(), move |conn| {
            conn.query_row(
                "SELECT id, rule_id, engine, started_at, completed_at, status, \
                 violations_found, execution_time_ms, error_message, files_checked, \
                 files_with_violations FROM rule_checks WHERE id = ?1",
                params![id],
                row_to_rule_check
            )
            .optional()
            .map_err(|e| storage_error(format!("failed to fetch rule check: {e}")))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Delta history
    // ---------------------------------------------------------------

    /// Compute the set difference between `current_hashes` and the hashes
    /// that were active for this check's rule before the check started,
    /// then record the corresponding `ViolationHistory` rows.
    ///
    /// Removed hashes are resolved (open question 1, policy a).
    pub async fn record_violation_deltas(
        &self,
        check_id: i64,
        current_hashes: &[String]
    ) -> AppResult<DeltaCounts> {
        let current_hashes = current_hashes.to_vec();
        run_blocking(self.conn(), move |conn| {
            let (rule_id, started_at): (String, String) = conn
                .query_row(
                    "SELECT rule_id, started_at FROM rule_checks WHERE id = ?1",
                    params![check_id],
                    |r| Ok((r.get(0)?, r.get(1)?))
                )
                .map_err(|e| storage_error(format!("unknown rule check {check_id}: {e}")))?;

            let mut stmt = conn
                .prepare(
                    "SELECT hash FROM violations WHERE rule_id = ?1 AND status = 'active' AND \
                     first_seen_at < ?2"
                )
                .map_err(|e| storage_error(format!("failed to prepare delta query: {e}")))?;
            let previous_active: Vec<String> = stmt
                .query_map(params![rule_id, started_at], |r| r.get::<_, String>(0))
                .map_err(|e| storage_error(format!("failed to query previous hashes: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| storage_error(format!("failed to read previous hashes: {e}")))?;

            let previous_set: std::collections::HashSet<&str> =
                previous_active.iter().map(String::as_str).collect();
            let current_set: std::collections::HashSet<&str> =
                current_hashes.iter().map(String::as_str).collect();

            let added: Vec<&str> = current_set.difference(&previous_set).copied().collect();
            let removed: Vec<&str> = previous_set.difference(&current_set).copied().collect();
            let unchanged: Vec<&str> = current_set.intersection(&previous_set).copied().collect();

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| storage_error(format!("failed to start transaction: {e}")))?;
            let recorded_at = to_rfc3339(now());
            for hash in &added {
                insert_history_row(&tx, check_id, hash, DeltaAction::Added, &recorded_at)?;
            }
            for hash in &removed {
                insert_history_row(&tx, check_id, hash, DeltaAction::Removed, &recorded_at)?;
                tx.execute(
                    "UPDATE violations SET status = 'resolved' WHERE hash = ?1 AND status = \
                     'active'",
                    params![hash]
                )
                .map_err(|e| storage_error(format!("failed to resolve '{hash}': {e}")))?;
            }
            for hash in &unchanged {
                insert_history_row(&tx, check_id, hash, DeltaAction::Unchanged, &recorded_at)?;
            }
            tx.commit()
                .map_err(|e| storage_error(format!("failed to commit delta history: {e}")))?;

            Ok(DeltaCounts {
                added:     added.len(),
                removed:   removed.len(),
                unchanged: unchanged.len()
            })
        })
        .await
    }

    /// Delta history rows for a check, oldest first.
    pub async fn list_history_for_check(&self, check_id: i64) -> AppResult<Vec<ViolationHistoryEntry>> {
        run_blocking(self.conn(), move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, check_id, violation_hash, action, previous_line, \
                     previous_message, recorded_at FROM violation_history WHERE check_id = ?1 \
                     ORDER BY id ASC"
                )
                .map_err(|e| storage_error(format!("failed to prepare history query: {e}")))?;
            let rows = stmt
                .query_map(params![check_id], row_to_history_entry)
                .map_err(|e| storage_error(format!("failed to query history: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| storage_error(format!("failed to read history: {e}")))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Rule schedules
    // ---------------------------------------------------------------

    /// Register a (rule, engine) schedule if it does not already exist.
    /// Returns the existing or newly created schedule.
    pub async fn register_rule_schedule(
        &self,
        rule_id: &str,
        engine: &str,
        priority: i64,
        check_frequency_ms: i64
    ) -> AppResult<RuleSchedule> {
        let rule_id = rule_id.to_string();
        let engine = engine.to_string();
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO rule_schedules (rule_id, engine, priority, \
                 check_frequency_ms, next_run_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![rule_id, engine, priority, check_frequency_ms, to_rfc3339(now())]
            )
            .map_err(|e| storage_error(format!("failed to register schedule: {e}")))?;
            conn.query_row(
                "SELECT id, rule_id, engine, enabled, priority, check_frequency_ms, \
                 last_run_at, next_run_at, consecutive_zero_count, avg_execution_time_ms, \
                 avg_violations_found FROM rule_schedules WHERE rule_id = ?1 AND engine = ?2",
                params![rule_id, engine],
                row_to_schedule
            )
            .map_err(|e| storage_error(format!("failed to fetch registered schedule: {e}")))
        })
        .await
    }

    /// Enabled schedules with `next_run_at <= now`, ordered by
    /// `(priority ASC, next_run_at ASC)`, capped at `limit`.
    pub async fn get_next_rules_to_check(&self, limit: usize) -> AppResult<Vec<RuleSchedule>> {
        run_blocking(self.conn(), move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, rule_id, engine, enabled, priority, check_frequency_ms, \
                     last_run_at, next_run_at, consecutive_zero_count, avg_execution_time_ms, \
                     avg_violations_found FROM rule_schedules WHERE enabled = 1 AND next_run_at \
                     <= ?1 ORDER BY priority ASC, next_run_at ASC LIMIT ?2"
                )
                .map_err(|e| storage_error(format!("failed to prepare schedule query: {e}")))?;
            let rows = stmt
                .query_map(params![to_rfc3339(now()), limit as i64], row_to_schedule)
                .map_err(|e| storage_error(format!("failed to query schedules: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| storage_error(format!("failed to read schedules: {e}")))
        })
        .await
    }

    /// Persist scheduler-computed adaptive statistics for one schedule.
    pub async fn update_rule_schedule(&self, schedule: &RuleSchedule) -> AppResult<()> {
        let schedule = schedule.clone();
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "UPDATE rule_schedules SET last_run_at = ?2, next_run_at = ?3, \
                 consecutive_zero_count = ?4, avg_execution_time_ms = ?5, avg_violations_found \
                 = ?6 WHERE id = ?1",
                params![
                    schedule.id,
                    schedule.last_run_at.map(to_rfc3339),
                    schedule.next_run_at.map(to_rfc3339),
                    schedule.consecutive_zero_count,
                    schedule.avg_execution_time_ms,
                    schedule.avg_violations_found
                ]
            )
            .map_err(|e| storage_error(format!("failed to update schedule {}: {e}", schedule.id)))?;
            Ok(())
        })
        .await
    }

    /// Enable or disable a schedule. Disabled schedules are never selected
    /// by `get_next_rules_to_check`.
    pub async fn set_schedule_enabled(&self, rule_id: &str, engine: &str, enabled: bool) -> AppResult<()> {
        let rule_id = rule_id.to_string();
        let engine = engine.to_string();
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "UPDATE rule_schedules SET enabled = ?3 WHERE rule_id = ?1 AND engine = ?2",
                params![rule_id, engine, enabled]
            )
            .map_err(|e| storage_error(format!("failed to set schedule enabled: {e}")))?;
            Ok(())
        })
        .await
    }

    // ---------------------------------------------------------------
    // Watch sessions
    // ---------------------------------------------------------------

    /// Create a new `WatchSession` row.
    pub async fn start_session(&self, working_directory: &str, critical_flags: &CriticalFlags) -> AppResult<WatchSession> {
        let working_directory = working_directory.to_string();
        let critical_flags = critical_flags.clone();
        run_blocking(self.conn(), move |conn| {
            let flags_json = serde_json::to_string(&critical_flags)
                .map_err(|e| storage_error(format!("failed to serialize critical flags: {e}")))?;
            conn.execute(
                "INSERT INTO watch_sessions (session_start, working_directory, critical_flags) \
                 VALUES (?1, ?2, ?3)",
                params![to_rfc3339(now()), working_directory, flags_json]
            )
            .map_err(|e| storage_error(format!("failed to start session: {e}")))?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                "SELECT id, session_start, session_end, total_checks, total_violations_start, \
                 total_violations_end, configuration, errors, working_directory, critical_flags \
                 FROM watch_sessions WHERE id = ?1",
                params![id],
                row_to_session
            )
            .map_err(|e| storage_error(format!("failed to fetch new session: {e}")))
        })
        .await
    }

    /// Persist the current state of a `WatchSession`.
    pub async fn update_session(&self, session: &WatchSession) -> AppResult<()> {
        let session = session.clone();
        run_blocking(self.conn(), move |conn| {
            let configuration_json = serde_json::to_string(&session.configuration)
                .map_err(|e| storage_error(format!("failed to serialize session configuration: {e}")))?;
            let errors_json = serde_json::to_string(&session.errors)
                .map_err(|e| storage_error(format!("failed to serialize session errors: {e}")))?;
            let flags_json = serde_json::to_string(&session.critical_flags)
                .map_err(|e| storage_error(format!("failed to serialize critical flags: {e}")))?;
            conn.execute(
                "UPDATE watch_sessions SET session_end = ?2, total_checks = ?3, \
                 total_violations_start = ?4, total_violations_end = ?5, configuration = ?6, \
                 errors = ?7, working_directory = ?8, critical_flags = ?9 WHERE id = ?1",
                params![
                    session.id,
                    session.session_end.map(to_rfc3339),
                    session.total_checks,
                    session.total_violations_start,
                    session.total_violations_end,
                    configuration_json,
                    errors_json,
                    session.working_directory,
                    flags_json
                ]
            )
            .map_err(|e| storage_error(format!("failed to update session {}: {e}", session.id)))?;
            Ok(())
        })
        .await
    }

    /// Most recently started `WatchSession`, if any.
    pub async fn latest_session(&self) -> AppResult<Option<WatchSession>> {
        run_blocking(self.conn(), move |conn| {
            conn.query_row(
                "SELECT id, session_start, session_end, total_checks, total_violations_start, \
                 total_violations_end, configuration, errors, working_directory, critical_flags \
                 FROM watch_sessions ORDER BY session_start DESC LIMIT 1",
                [],
                row_to_session
            )
            .optional()
            .map_err(|e| storage_error(format!("failed to fetch latest session: {e}")))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Metrics
    // ---------------------------------------------------------------

    /// Append one `PerformanceMetric` row. Failures here are typically
    /// swallowed by callers: this returns a `Result` only so callers that
    /// want to observe failures can.
    pub async fn record_metric(
        &self,
        metric_type: &str,
        value: f64,
        unit: &str,
        context: Option<&str>
    ) -> AppResult<()> {
        let metric_type = metric_type.to_string();
        let unit = unit.to_string();
        let context = context.map(|s| s.to_string());
        run_blocking(self.conn(), move |conn| {
            conn.execute(
                "INSERT INTO performance_metrics (metric_type, metric_value, metric_unit, \
                 context, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![metric_type, value, unit, context, to_rfc3339(now())]
            )
            .map_err(|e| storage_error(format!("failed to record metric: {e}")))?;
            Ok(())
        })
        .await
    }

    /// Most recent metrics of a given type, newest first.
    pub async fn recent_metrics(&self, metric_type: &str, limit: usize) -> AppResult<Vec<PerformanceMetric>> {
        let metric_type = metric_type.to_string();
        run_blocking(self.conn(), move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, metric_type, metric_value, metric_unit, context, recorded_at \
                     FROM performance_metrics WHERE metric_type = ?1 ORDER BY recorded_at DESC \
                     LIMIT ?2"
                )
                .map_err(|e| storage_error(format!("failed to prepare metrics query: {e}")))?;
            let rows = stmt
                .query_map(params![metric_type, limit as i64], row_to_metric)
                .map_err(|e| storage_error(format!("failed to query metrics: {e}")))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| storage_error(format!("failed to read metrics: {e}")))
        })
        .await
    }

    // ---------------------------------------------------------------
    // Retention
    // ---------------------------------------------------------------

    /// Delete `ViolationHistory` and `PerformanceMetric` rows older than
    /// `max_history_days`. Never deletes active violations.
    pub async fn cleanup_old_data(&self, max_history_days: u32) -> AppResult<CleanupResult> {
        run_blocking(self.conn(), move |conn| {
            let cutoff = to_rfc3339(now() - chrono::Duration::days(i64::from(max_history_days)));
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| storage_error(format!("failed to start transaction: {e}")))?;
            let history_deleted = tx
                .execute(
                    "DELETE FROM violation_history WHERE recorded_at < ?1",
                    params![cutoff]
                )
                .map_err(|e| storage_error(format!("failed to clean history: {e}")))?;
            let metrics_deleted = tx
                .execute(
                    "DELETE FROM performance_metrics WHERE recorded_at < ?1",
                    params![cutoff]
                )
                .map_err(|e| storage_error(format!("failed to clean metrics: {e}")))?;
            tx.commit()
                .map_err(|e| storage_error(format!("failed to commit cleanup: {e}")))?;
            Ok(CleanupResult {
                history_deleted,
                metrics_deleted
            })
        })
        .await
    }
}

fn insert_history_row(
    tx: &rusqlite::Transaction<'_>,
    check_id: i64,
    hash: &str,
    action: DeltaAction,
    recorded_at: &str
) -> AppResult<()> {
    tx.execute(
        "INSERT INTO violation_history (check_id, violation_hash, action, recorded_at) VALUES \
         (?1, ?2, ?3, ?4)",
        params![check_id, hash, action.to_string(), recorded_at]
    )
    .map_err(|e| storage_error(format!("failed to record history for '{hash}': {e}")))?;
    Ok(())
}

fn row_to_violation(row: &Row<'_>) -> rusqlite::Result<Violation> {
    let severity: String = row.get(4)?;
    let source: String = row.get(5)?;
    let status: String = row.get(13)?;
    let first_seen_at: String = row.get(11)?;
    let last_seen_at: String = row.get(12)?;
    Ok(Violation {
        id:            row.get(0)?,
        file_path:     CompactString::from(row.get::<_, String>(1)?),
        rule_id:       CompactString::from(row.get::<_, String>(2)?),
        category:      CompactString::from(row.get::<_, String>(3)?),
        severity:      severity.parse::<Severity>().map_err(to_rusqlite_err)?,
        source:        source.parse::<Source>().map_err(to_rusqlite_err)?,
        message:       CompactString::from(row.get::<_, String>(6)?),
        line:          row.get(7)?,
        column:        row.get(8)?,
        code_snippet:  row.get::<_, Option<String>>(9)?.map(CompactString::from),
        hash:          row.get(10)?,
        first_seen_at: parse_dt(&first_seen_at)?,
        last_seen_at:  parse_dt(&last_seen_at)?,
        status:        status.parse::<ViolationStatus>().map_err(to_rusqlite_err)?
    })
}

fn row_to_rule_check(row: &Row<'_>) -> rusqlite::Result<RuleCheck> {
    let status: String = row.get(5)?;
    let started_at: String = row.get(3)?;
    let completed_at: Option<String> = row.get(4)?;
    Ok(RuleCheck {
        id:                    row.get(0)?,
        rule_id:               row.get(1)?,
        engine:                row.get(2)?,
        started_at:            parse_dt(&started_at)?,
        completed_at:          completed_at.map(|s| parse_dt(&s)).transpose()?,
        status:                status.parse::<CheckStatus>().map_err(to_rusqlite_err)?,
        violations_found:      row.get(6)?,
        execution_time_ms:     row.get(7)?,
        error_message:         row.get(8)?,
        files_checked:         row.get(9)?,
        files_with_violations: row.get(10)?
    })
}

fn row_to_history_entry(row: &Row<'_>) -> rusqlite::Result<ViolationHistoryEntry> {
    let action: String = row.get(3)?;
    let recorded_at: String = row.get(6)?;
    Ok(ViolationHistoryEntry {
        id:               row.get(0)?,
        check_id:         row.get(1)?,
        violation_hash:   row.get(2)?,
        action:           action.parse::<DeltaAction>().map_err(to_rusqlite_err)?,
        previous_line:    row.get(4)?,
        previous_message: row.get(5)?,
        recorded_at:      parse_dt(&recorded_at)?
    })
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<RuleSchedule> {
    let last_run_at: Option<String> = row.get(6)?;
    let next_run_at: Option<String> = row.get(7)?;
    Ok(RuleSchedule {
        id:                     row.get(0)?,
        rule_id:                row.get(1)?,
        engine:                 row.get(2)?,
        enabled:                row.get(3)?,
        priority:               row.get(4)?,
        check_frequency_ms:     row.get(5)?,
        last_run_at:            last_run_at.map(|s| parse_dt(&s)).transpose()?,
        next_run_at:            next_run_at.map(|s| parse_dt(&s)).transpose()?,
        consecutive_zero_count: row.get(8)?,
        avg_execution_time_ms:  row.get(9)?,
        avg_violations_found:   row.get(10)?
    })
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<PerformanceMetric> {
    let recorded_at: String = row.get(5)?;
    Ok(PerformanceMetric {
        id:           row.get(0)?,
        metric_type:  row.get(1)?,
        metric_value: row.get(2)?,
        metric_unit:  row.get(3)?,
        context:      row.get(4)?,
        recorded_at:  parse_dt(&recorded_at)?
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<WatchSession> {
    let session_start: String = row.get(1)?;
    let session_end: Option<String> = row.get(2)?;
    let configuration: String = row.get(6)?;
    let errors: String = row.get(7)?;
    let critical_flags: String = row.get(9)?;
    Ok(WatchSession {
        id:                     row.get(0)?,
        session_start:          parse_dt(&session_start)?,
        session_end:            session_end.map(|s| parse_dt(&s)).transpose()?,
        total_checks:           row.get(3)?,
        total_violations_start: row.get(4)?,
        total_violations_end:   row.get(5)?,
        configuration:          serde_json::from_str(&configuration).map_err(|e| to_rusqlite_err(storage_error(e.to_string())))?,
        errors:                 serde_json::from_str(&errors).map_err(|e| to_rusqlite_err(storage_error(e.to_string())))?,
        working_directory:      row.get(8)?,
        critical_flags:         serde_json::from_str(&critical_flags).map_err(|e| to_rusqlite_err(storage_error(e.to_string())))?
    })
}

fn to_rusqlite_err(e: crate::error::AppError) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
}

#[cfg(test)]
mod tests;
