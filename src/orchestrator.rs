//! Composition root: owns the `Store`, `ViolationTracker`, `Scheduler`,
//! and `AnalysisService`, and exposes the small surface a CLI layer needs
//! — `submit` for one-shot ingestion, `run_once` for a scheduler cycle,
//! `start_watch`/`stop_watch` for continuous mode.

use std::sync::Arc;

use crate::{
    analysis::AnalysisService,
    config::Config,
    display::DisplayPort,
    domain::{CriticalFlags, ViolationInput},
    engine::EngineAdapter,
    error::AppResult,
    scheduler::{RuleCheckOutcome, Scheduler, SchedulerEvent},
    store::Store,
    tracker::{ProcessResult, ViolationTracker},
    watch::WatchController
};

pub struct Orchestrator {
    store:                 Store,
    tracker:                Arc<ViolationTracker>,
    scheduler:              Arc<Scheduler>,
    analysis:               AnalysisService,
    max_concurrent_checks: usize
}

impl Orchestrator {
    pub fn new(store: Store, engines: Vec<Arc<dyn EngineAdapter>>, config: &Config) -> Self {
        let tracker = Arc::new(ViolationTracker::new(store.clone(), config.performance.batch_size));
        let scheduler = Arc::new(
            Scheduler::new(store.clone(), tracker.clone(), engines)
                .with_timeout(std::time::Duration::from_secs(30))
        );
        let analysis = AnalysisService::new(store.clone());
        Self {
            store,
            tracker,
            scheduler,
            analysis,
            max_concurrent_checks: config.polling.max_concurrent_checks
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<ViolationTracker> {
        &self.tracker
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn analysis(&self) -> &AnalysisService {
        &self.analysis
    }

    pub async fn subscribe_scheduler_events(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.scheduler.subscribe().await
    }

    pub async fn register_rule(
        &self,
        rule_id: &str,
        engine: &str,
        priority: i64,
        check_frequency_ms: i64
    ) -> AppResult<()> {
        self.scheduler.register_rule(rule_id, engine, priority, check_frequency_ms).await?;
        Ok(())
    }

    /// One-shot ingestion path: engine adapters → `submit` → tracker →
    /// store, bypassing the scheduler entirely.
    pub async fn submit(&self, violations: Vec<ViolationInput>) -> AppResult<ProcessResult> {
        self.tracker.process_violations(violations).await
    }

    /// One scheduler cycle over all due rules, respecting the configured
    /// concurrency cap.
    pub async fn run_once(&self) -> AppResult<Vec<RuleCheckOutcome>> {
        self.scheduler.execute_next_rules(self.max_concurrent_checks).await
    }

    /// Build and run a [`WatchController`] to completion, returning the
    /// process exit code. The returned controller's `request_stop` is the
    /// counterpart exposed for callers that want `stop_watch` semantics
    /// from another task.
    pub async fn start_watch(
        self: Arc<Self>,
        display: Arc<dyn DisplayPort>,
        data_dir: impl AsRef<std::path::Path>,
        cwd: impl Into<String>,
        critical_flags: CriticalFlags
    ) -> AppResult<Arc<WatchController>> {
        let controller = Arc::new(
            WatchController::new(self.clone(), display, data_dir, cwd, critical_flags, self.max_concurrent_checks)
                .await?
        );
        Ok(controller)
    }

    /// Request a running [`WatchController`] to stop at its next safe
    /// point.
    pub fn stop_watch(&self, controller: &WatchController) {
        controller.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{Severity, Source},
        engine::FakeEngine
    };

    fn config() -> Config {
        Config::default()
    }

    #[tokio::test]
    async fn submit_routes_violations_through_the_tracker() {
        let store = Store::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(store, vec![], &config());

        let result = orchestrator
            .submit(vec![ViolationInput {
                file:     "src/lib.rs".to_string(),
                line:     Some(3),
                column:   None,
                message:  "unused import".to_string(),
                category: "correctness".to_string(),
                severity: Severity::Warn,
                source:   Source::Linter,
                rule:     Some("no-unused-vars".to_string()),
                code:     None
            }])
            .await
            .unwrap();
        assert_eq!(result.inserted, 1);

        let active = orchestrator.store().list_active_violations(None).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn run_once_dispatches_registered_schedules() {
        let store = Store::open_in_memory().unwrap();
        let engine: Arc<dyn EngineAdapter> = Arc::new(FakeEngine::new("linter"));
        let orchestrator = Orchestrator::new(store, vec![engine], &config());
        orchestrator.register_rule("no-unused-vars", "linter", 1, 60_000).await.unwrap();

        let outcomes = orchestrator.run_once().await.unwrap();
        assert_eq!(outcomes.len(), 1);
    }
}
