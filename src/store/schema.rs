//! Schema DDL and version guard for the embedded store.
//!
//! `last_seen_at` maintenance and `RuleSchedule` statistics are updated by
//! application code (`store/mod.rs` and `scheduler.rs` respectively) — no
//! trigger exists anywhere in this file, so there is a single source of
//! truth for both (see DESIGN.md, open question 2).

/// Bump whenever the DDL below changes incompatibly. [`crate::store::Store::open`]
/// refuses to start when an on-disk database was created by a different
/// version.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS schema_meta (
        version INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_path TEXT NOT NULL,
        rule_id TEXT NOT NULL,
        category TEXT NOT NULL,
        severity TEXT NOT NULL,
        source TEXT NOT NULL,
        message TEXT NOT NULL,
        line INTEGER,
        column INTEGER,
        code_snippet TEXT,
        hash TEXT NOT NULL UNIQUE,
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active'
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_violations_hash ON violations(hash);
    CREATE INDEX IF NOT EXISTS idx_violations_status ON violations(status);
    CREATE INDEX IF NOT EXISTS idx_violations_category_severity
        ON violations(category, severity) WHERE status = 'active';
    CREATE INDEX IF NOT EXISTS idx_violations_file_rule ON violations(file_path, rule_id);
    CREATE INDEX IF NOT EXISTS idx_violations_rule_status ON violations(rule_id, status);

    CREATE TABLE IF NOT EXISTS rule_checks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_id TEXT NOT NULL,
        engine TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL DEFAULT 'running',
        violations_found INTEGER,
        execution_time_ms INTEGER,
        error_message TEXT,
        files_checked INTEGER,
        files_with_violations INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_rule_checks_rule_engine ON rule_checks(rule_id, engine);
    CREATE INDEX IF NOT EXISTS idx_rule_checks_status ON rule_checks(status);

    CREATE TABLE IF NOT EXISTS violation_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        check_id INTEGER NOT NULL REFERENCES rule_checks(id) ON DELETE CASCADE,
        violation_hash TEXT NOT NULL,
        action TEXT NOT NULL,
        previous_line INTEGER,
        previous_message TEXT,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_violation_history_check ON violation_history(check_id);
    CREATE INDEX IF NOT EXISTS idx_violation_history_recorded_at ON violation_history(recorded_at);

    CREATE TABLE IF NOT EXISTS rule_schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        rule_id TEXT NOT NULL,
        engine TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        priority INTEGER NOT NULL DEFAULT 5,
        check_frequency_ms INTEGER NOT NULL,
        last_run_at TEXT,
        next_run_at TEXT,
        consecutive_zero_count INTEGER NOT NULL DEFAULT 0,
        avg_execution_time_ms REAL NOT NULL DEFAULT 0,
        avg_violations_found REAL NOT NULL DEFAULT 0,
        UNIQUE(rule_id, engine)
    );

    CREATE INDEX IF NOT EXISTS idx_rule_schedules_next_run
        ON rule_schedules(next_run_at) WHERE enabled = 1;
    CREATE INDEX IF NOT EXISTS idx_rule_schedules_priority_next_run
        ON rule_schedules(priority, next_run_at);

    CREATE TABLE IF NOT EXISTS watch_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_start TEXT NOT NULL,
        session_end TEXT,
        total_checks INTEGER NOT NULL DEFAULT 0,
        total_violations_start INTEGER NOT NULL DEFAULT 0,
        total_violations_end INTEGER NOT NULL DEFAULT 0,
        configuration TEXT NOT NULL DEFAULT '{}',
        errors TEXT NOT NULL DEFAULT '[]',
        working_directory TEXT NOT NULL DEFAULT '',
        critical_flags TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS performance_metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        metric_type TEXT NOT NULL,
        metric_value REAL NOT NULL,
        metric_unit TEXT NOT NULL,
        context TEXT,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_performance_metrics_recorded_at
        ON performance_metrics(recorded_at);
    CREATE INDEX IF NOT EXISTS idx_performance_metrics_type ON performance_metrics(metric_type);
";
