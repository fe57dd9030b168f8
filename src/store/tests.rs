use chrono::Utc;
use compact_str::CompactString;

use super::*;
use crate::domain::{CriticalFlags, Severity, Source, ViolationStatus};

fn sample_violation(hash: &str, rule_id: &str) -> Violation {
    let now = Utc::now();
    Violation {
        id:            None,
        file_path:     CompactString::from("src/lib.rs"),
        rule_id:       CompactString::from(rule_id),
        category:      CompactString::from("correctness"),
        severity:      Severity::Error,
        source:        Source::Linter,
        message:       CompactString::from("unused import"),
        line:          Some(10),
        column:        Some(1),
        code_snippet:  None,
        hash:          hash.to_string(),
        first_seen_at: now,
        last_seen_at:  now,
        status:        ViolationStatus::Active
    }
}

#[tokio::test]
async fn store_violations_inserts_new_rows() {
    let store = Store::open_in_memory().unwrap();
    let result = store
        .store_violations(&[sample_violation("h1", "no-unused-vars")])
        .await
        .unwrap();
    assert_eq!(result.inserted, 1);
    assert_eq!(result.updated, 0);
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn store_violations_is_idempotent_on_hash() {
    let store = Store::open_in_memory().unwrap();
    let v = sample_violation("h1", "no-unused-vars");
    store.store_violations(&[v.clone()]).await.unwrap();
    let result = store.store_violations(&[v]).await.unwrap();
    assert_eq!(result.inserted, 0);
    assert_eq!(result.updated, 1);

    let active = store.list_active_violations(None).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn resolve_and_reactivate_round_trip() {
    let store = Store::open_in_memory().unwrap();
    store
        .store_violations(&[sample_violation("h1", "no-unused-vars")])
        .await
        .unwrap();

    let resolved = store.resolve_violations(&["h1".to_string()]).await.unwrap();
    assert_eq!(resolved, 1);
    assert!(store.list_active_violations(None).await.unwrap().is_empty());

    let reactivated = store.reactivate_violations(&["h1".to_string()]).await.unwrap();
    assert_eq!(reactivated, 1);
    assert_eq!(store.list_active_violations(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn record_violation_deltas_computes_added_removed_unchanged() {
    let store = Store::open_in_memory().unwrap();
    store
        .store_violations(&[sample_violation("h1", "no-unused-vars"), sample_violation("h2", "no-unused-vars")])
        .await
        .unwrap();

    let first_check = store.start_rule_check("no-unused-vars", "linter").await.unwrap();
    let counts = store
        .record_violation_deltas(first_check, &["h1".to_string(), "h2".to_string()])
        .await
        .unwrap();
    // Nothing was "previously active" before the first check started, so
    // both h1 and h2 count as newly added.
    assert_eq!(counts.added, 2);
    assert_eq!(counts.removed, 0);
    assert_eq!(counts.unchanged, 0);

    let second_check = store.start_rule_check("no-unused-vars", "linter").await.unwrap();
    let counts = store
        .record_violation_deltas(second_check, &["h1".to_string(), "h3".to_string()])
        .await
        .unwrap();
    assert_eq!(counts.added, 1); // h3
    assert_eq!(counts.removed, 1); // h2
    assert_eq!(counts.unchanged, 1); // h1

    let active = store.list_active_violations(Some("no-unused-vars")).await.unwrap();
    let active_hashes: std::collections::HashSet<_> = active.iter().map(|v| v.hash.as_str()).collect();
    assert!(active_hashes.contains("h1"));
    assert!(!active_hashes.contains("h2"));
}

#[tokio::test]
async fn schedule_selection_respects_priority_and_due_time() {
    let store = Store::open_in_memory().unwrap();
    store.register_rule_schedule("slow-rule", "typechecker", 9, 60_000).await.unwrap();
    store.register_rule_schedule("fast-rule", "linter", 1, 60_000).await.unwrap();

    let due = store.get_next_rules_to_check(10).await.unwrap();
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].rule_id, "fast-rule");
}

#[tokio::test]
async fn disabled_schedule_is_never_selected() {
    let store = Store::open_in_memory().unwrap();
    store.register_rule_schedule("no-unused-vars", "linter", 5, 60_000).await.unwrap();
    store.set_schedule_enabled("no-unused-vars", "linter", false).await.unwrap();

    let due = store.get_next_rules_to_check(10).await.unwrap();
    assert!(due.is_empty());
}

#[tokio::test]
async fn cleanup_old_data_drops_only_stale_history_and_metrics() {
    let store = Store::open_in_memory().unwrap();
    store.record_metric("check_duration_ms", 42.0, "ms", None).await.unwrap();

    let result = store.cleanup_old_data(30).await.unwrap();
    assert_eq!(result.metrics_deleted, 0);

    let recent = store.recent_metrics("check_duration_ms", 10).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn rule_check_lifecycle_transitions_are_persisted() {
    let store = Store::open_in_memory().unwrap();
    let id = store.start_rule_check("no-unused-vars", "linter").await.unwrap();
    store.complete_rule_check(id, 3, 120, 10, 2).await.unwrap();

    let check = store.get_rule_check(id).await.unwrap().unwrap();
    assert_eq!(check.status, crate::domain::CheckStatus::Completed);
    assert_eq!(check.violations_found, Some(3));
}

#[tokio::test]
async fn failed_and_timed_out_checks_record_a_message() {
    let store = Store::open_in_memory().unwrap();
    let id = store.start_rule_check("no-unused-vars", "linter").await.unwrap();
    store.fail_rule_check(id, "engine crashed").await.unwrap();
    let check = store.get_rule_check(id).await.unwrap().unwrap();
    assert_eq!(check.status, crate::domain::CheckStatus::Failed);
    assert_eq!(check.error_message.as_deref(), Some("engine crashed"));

    let id2 = store.start_rule_check("no-unused-vars", "linter").await.unwrap();
    store.timeout_rule_check(id2).await.unwrap();
    let check2 = store.get_rule_check(id2).await.unwrap().unwrap();
    assert_eq!(check2.status, crate::domain::CheckStatus::Timeout);
}

#[tokio::test]
async fn session_lifecycle_persists_and_returns_latest() {
    let store = Store::open_in_memory().unwrap();
    let flags = CriticalFlags {
        target_path: "/repo/src".to_string(),
        strict:      true,
        eslint_only: false
    };
    let mut session = store.start_session("/repo", &flags).await.unwrap();
    assert_eq!(session.total_checks, 0);
    assert_eq!(session.working_directory, "/repo");

    session.total_checks = 5;
    session.session_end = Some(Utc::now());
    store.update_session(&session).await.unwrap();

    let latest = store.latest_session().await.unwrap().unwrap();
    assert_eq!(latest.id, session.id);
    assert_eq!(latest.total_checks, 5);
    assert!(latest.session_end.is_some());
    assert_eq!(latest.critical_flags, flags);
}

#[tokio::test]
async fn latest_session_is_none_before_any_session_starts() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.latest_session().await.unwrap().is_none());
}
