//! End-to-end coverage for watch-mode session resumption and shutdown
//! that doesn't fit cleanly inside a single module's unit tests.

use std::{sync::Arc, time::Duration};

use sidequest_core::{
    Config, Orchestrator,
    domain::{CriticalFlags, SessionError, WatchSession},
    engine::{EngineAdapter, FakeEngine},
    session::SessionStore,
    store::Store,
    watch::WatchController
};

fn flags(strict: bool) -> CriticalFlags {
    CriticalFlags {
        target_path: "/repo/src".to_string(),
        strict,
        eslint_only: false
    }
}

async fn orchestrator() -> Arc<Orchestrator> {
    let store = Store::open_in_memory().unwrap();
    let engine: Arc<dyn EngineAdapter> = Arc::new(FakeEngine::new("linter"));
    let orchestrator = Arc::new(Orchestrator::new(store, vec![engine], &Config::default()));
    orchestrator.register_rule("no-unused-vars", "linter", 1, 60_000).await.unwrap();
    orchestrator
}

// Scenario D — session resumption rejected on flag mismatch: a saved
// session with `strict=false` must not be resumed by a run started with
// `strict=true`; the controller writes a fresh session to disk instead.
#[tokio::test]
async fn session_resumption_rejected_on_flag_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionStore::new(dir.path());

    let saved = WatchSession {
        id:                      42,
        session_start:          chrono::Utc::now(),
        session_end:            None,
        total_checks:            7,
        total_violations_start: 0,
        total_violations_end:   0,
        configuration:          serde_json::json!({}),
        errors:                 Vec::<SessionError>::new(),
        working_directory:      "/repo".to_string(),
        critical_flags:         flags(false)
    };
    sessions.save(&saved).unwrap();

    let orchestrator = orchestrator().await;
    let _controller = WatchController::new(orchestrator, Arc::new(sidequest_core::NullDisplay), dir.path(), "/repo", flags(true), 3)
        .await
        .unwrap();

    let on_disk = sessions.load().unwrap().unwrap();
    assert_ne!(on_disk.id, 42);
    assert_eq!(on_disk.total_checks, 0);
    assert!(on_disk.critical_flags.strict);
}

// A saved session whose critical flags and working directory match is
// resumed rather than replaced.
#[tokio::test]
async fn session_resumption_accepted_on_matching_flags() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = SessionStore::new(dir.path());
    let orchestrator = orchestrator().await;

    let first = orchestrator.store().start_session("/repo", &flags(true)).await.unwrap();
    sessions.save(&first).unwrap();

    let _controller = WatchController::new(orchestrator, Arc::new(sidequest_core::NullDisplay), dir.path(), "/repo", flags(true), 3)
        .await
        .unwrap();

    let on_disk = sessions.load().unwrap().unwrap();
    assert_eq!(on_disk.id, first.id);
}

// Scenario E — shutdown on interrupt: an external stop request must bring
// `run()` to a clean exit (code 0) instead of running past its tick loop
// indefinitely.
#[tokio::test]
async fn external_stop_request_shuts_watch_down_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator().await;
    let controller = Arc::new(
        WatchController::new(orchestrator, Arc::new(sidequest_core::NullDisplay), dir.path(), "/repo", flags(false), 3)
            .await
            .unwrap()
            .with_tick(Duration::from_millis(20))
            .with_safety_deadline(Duration::from_secs(60))
    );

    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.request_stop();

    let exit_code = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("watch controller did not shut down in time")
        .unwrap();
    assert_eq!(exit_code, 0);
}
