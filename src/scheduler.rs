//! Adaptive rule scheduler: decides what runs next, enforces a
//! concurrency cap, and adjusts per-schedule frequency from observed
//! outcomes.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant}
};

use chrono::Utc;
use indexmap::IndexSet;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc};

use crate::{
    domain::RuleSchedule,
    engine::EngineAdapter,
    error::{AppResult, timeout_error},
    store::Store,
    tracker::ViolationTracker
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a single dispatched execution.
#[derive(Debug, Clone)]
pub struct RuleCheckOutcome {
    pub rule_id:           String,
    pub engine:            String,
    pub check_id:          i64,
    pub violations_found:  i64,
    pub added:             usize,
    pub removed:           usize,
    pub unchanged:         usize,
    pub execution_time_ms: i64
}

/// Delivered over [`Scheduler::subscribe`]. Best-effort: if the receiver
/// lags or is gone, events are dropped silently.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    RuleStarted { rule_id: String, engine: String },
    RuleCompleted { outcome: RuleCheckOutcome },
    RuleFailed { rule_id: String, engine: String, error: String },
    CycleCompleted { outcomes: Vec<RuleCheckOutcome> }
}

/// Owns the set of rule schedules and dispatches due ones, respecting a
/// concurrency cap and per-(rule, engine) serialization.
pub struct Scheduler {
    store:      Store,
    tracker:    Arc<ViolationTracker>,
    engines:    HashMap<String, Arc<dyn EngineAdapter>>,
    in_flight:  Arc<AsyncMutex<IndexSet<(String, String)>>>,
    timeout:    Duration,
    events_tx:  mpsc::UnboundedSender<SchedulerEvent>,
    events_rx:  AsyncMutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>
}

impl Scheduler {
    pub fn new(store: Store, tracker: Arc<ViolationTracker>, engines: Vec<Arc<dyn EngineAdapter>>) -> Self {
        let engines = engines.into_iter().map(|e| (e.name().to_string(), e)).collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            tracker,
            engines,
            in_flight: Arc::new(AsyncMutex::new(IndexSet::new())),
            timeout: DEFAULT_TIMEOUT,
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx))
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Takes ownership of the event receiver. Callable once; subsequent
    /// calls return `None`.
    pub async fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SchedulerEvent>> {
        self.events_rx.lock().await.take()
    }

    pub async fn register_rule(
        &self,
        rule_id: &str,
        engine: &str,
        priority: i64,
        check_frequency_ms: i64
    ) -> AppResult<RuleSchedule> {
        self.store
            .register_rule_schedule(rule_id, engine, priority, check_frequency_ms)
            .await
    }

    pub async fn set_enabled(&self, rule_id: &str, engine: &str, enabled: bool) -> AppResult<()> {
        self.store.set_schedule_enabled(rule_id, engine, enabled).await
    }

    /// One scheduling cycle: load due schedules, skip in-flight keys,
    /// dispatch up to `max_concurrent` executions in parallel, and wait
    /// for all of them.
    pub async fn execute_next_rules(&self, max_concurrent: usize) -> AppResult<Vec<RuleCheckOutcome>> {
        let candidates = self.store.get_next_rules_to_check(max_concurrent.max(1) * 4).await?;

        let mut to_dispatch = Vec::new();
        {
            let mut in_flight = self.in_flight.lock().await;
            for schedule in candidates {
                let key = (schedule.rule_id.clone(), schedule.engine.clone());
                if in_flight.contains(&key) {
                    continue;
                }
                in_flight.insert(key);
                to_dispatch.push(schedule);
                if to_dispatch.len() >= max_concurrent {
                    break;
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(to_dispatch.len());
        for schedule in to_dispatch {
            let permit = semaphore.clone();
            let this = self.clone_handles();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.ok();
                this.dispatch_one(schedule).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            if let Ok(Some(outcome)) = handle.await {
                outcomes.push(outcome);
            }
        }

        let _ = self.events_tx.send(SchedulerEvent::CycleCompleted {
            outcomes: outcomes.clone()
        });
        Ok(outcomes)
    }

    /// Shallow clone of the handles `dispatch_one` needs, so it can run
    /// inside a spawned task without borrowing `&self` across `.await`.
    fn clone_handles(&self) -> DispatchHandles {
        DispatchHandles {
            store:     self.store.clone(),
            tracker:   self.tracker.clone(),
            engines:   self.engines.clone(),
            in_flight: self.in_flight.clone(),
            timeout:   self.timeout,
            events_tx: self.events_tx.clone()
        }
    }
}

#[derive(Clone)]
struct DispatchHandles {
    store:     Store,
    tracker:   Arc<ViolationTracker>,
    engines:   HashMap<String, Arc<dyn EngineAdapter>>,
    in_flight: Arc<AsyncMutex<IndexSet<(String, String)>>>,
    timeout:   Duration,
    events_tx: mpsc::UnboundedSender<SchedulerEvent>
}

impl DispatchHandles {
    async fn dispatch_one(self, schedule: RuleSchedule) -> Option<RuleCheckOutcome> {
        let key = (schedule.rule_id.clone(), schedule.engine.clone());
        let result = self.run_schedule(&schedule).await;
        self.in_flight.lock().await.swap_remove(&key);
        result
    }

    async fn run_schedule(&self, schedule: &RuleSchedule) -> Option<RuleCheckOutcome> {
        let Some(engine) = self.engines.get(&schedule.engine).cloned() else {
            let _ = self.events_tx.send(SchedulerEvent::RuleFailed {
                rule_id: schedule.rule_id.clone(),
                engine:  schedule.engine.clone(),
                error:   format!("no engine adapter registered for '{}'", schedule.engine)
            });
            return None;
        };

        let _ = self.events_tx.send(SchedulerEvent::RuleStarted {
            rule_id: schedule.rule_id.clone(),
            engine:  schedule.engine.clone()
        });

        let check_id = match self.store.start_rule_check(&schedule.rule_id, &schedule.engine).await {
            Ok(id) => id,
            Err(e) => {
                let _ = self.events_tx.send(SchedulerEvent::RuleFailed {
                    rule_id: schedule.rule_id.clone(),
                    engine:  schedule.engine.clone(),
                    error:   e.to_string()
                });
                return None;
            }
        };

        let started = Instant::now();
        let run_result = tokio::time::timeout(self.timeout, engine.run(&schedule.rule_id)).await;

        let run = match run_result {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                let _ = self.store.fail_rule_check(check_id, &e.to_string()).await;
                self.apply_adaptive_update(schedule, 0.0, started.elapsed()).await;
                let _ = self.events_tx.send(SchedulerEvent::RuleFailed {
                    rule_id: schedule.rule_id.clone(),
                    engine:  schedule.engine.clone(),
                    error:   e.to_string()
                });
                return None;
            }
            Err(_) => {
                let _ = self.store.timeout_rule_check(check_id).await;
                self.apply_adaptive_update(schedule, 0.0, self.timeout).await;
                let err = timeout_error(&schedule.rule_id, &schedule.engine);
                let _ = self.events_tx.send(SchedulerEvent::RuleFailed {
                    rule_id: schedule.rule_id.clone(),
                    engine:  schedule.engine.clone(),
                    error:   err.to_string()
                });
                return None;
            }
        };

        let _process_result = match self.tracker.process_violations(run.violations.clone()).await {
            Ok(r) => r,
            Err(e) => {
                let _ = self.store.fail_rule_check(check_id, &e.to_string()).await;
                self.apply_adaptive_update(schedule, 0.0, started.elapsed()).await;
                let _ = self.events_tx.send(SchedulerEvent::RuleFailed {
                    rule_id: schedule.rule_id.clone(),
                    engine:  schedule.engine.clone(),
                    error:   e.to_string()
                });
                return None;
            }
        };

        let current_hashes: Vec<String> = run
            .violations
            .iter()
            .map(|v| self.tracker.generate_violation_hash(v))
            .collect();
        let deduped_current: Vec<String> = {
            let mut seen = HashSet::new();
            current_hashes.into_iter().filter(|h| seen.insert(h.clone())).collect()
        };
        let found = deduped_current.len() as i64;

        let deltas = match self.store.record_violation_deltas(check_id, &deduped_current).await {
            Ok(d) => d,
            Err(e) => {
                let _ = self.store.fail_rule_check(check_id, &e.to_string()).await;
                self.apply_adaptive_update(schedule, 0.0, started.elapsed()).await;
                return None;
            }
        };

        let execution_time_ms = started.elapsed().as_millis() as i64;
        let _ = self
            .store
            .complete_rule_check(
                check_id,
                found,
                execution_time_ms,
                run.files_checked,
                run.files_with_violations
            )
            .await;

        let context_tag = format!("{}:{}", schedule.rule_id, schedule.engine);
        let _ = self
            .store
            .record_metric("rule_violations_found", found as f64, "count", Some(&context_tag))
            .await;

        self.apply_adaptive_update(schedule, found as f64, started.elapsed()).await;

        let outcome = RuleCheckOutcome {
            rule_id: schedule.rule_id.clone(),
            engine: schedule.engine.clone(),
            check_id,
            violations_found: found,
            added: deltas.added,
            removed: deltas.removed,
            unchanged: deltas.unchanged,
            execution_time_ms
        };
        let _ = self.events_tx.send(SchedulerEvent::RuleCompleted {
            outcome: outcome.clone()
        });
        Some(outcome)
    }

    async fn apply_adaptive_update(&self, schedule: &RuleSchedule, observed_violations: f64, elapsed: Duration) {
        let mut updated = schedule.clone();
        apply_adaptive_formulas(&mut updated, observed_violations, elapsed.as_millis() as f64, Utc::now());
        let _ = self.store.update_rule_schedule(&updated).await;
    }
}

/// Pure implementation of the adaptive-frequency formulas, split out so
/// they can be tested without a store or an event loop.
pub fn apply_adaptive_formulas(
    schedule: &mut RuleSchedule,
    observed_violations: f64,
    observed_execution_time_ms: f64,
    now: chrono::DateTime<Utc>
) {
    schedule.avg_execution_time_ms = 0.8 * schedule.avg_execution_time_ms + 0.2 * observed_execution_time_ms;
    schedule.avg_violations_found = 0.8 * schedule.avg_violations_found + 0.2 * observed_violations;
    schedule.consecutive_zero_count = if observed_violations == 0.0 {
        schedule.consecutive_zero_count + 1
    } else {
        0
    };

    let delta_ms = if schedule.avg_violations_found > 5.0 {
        schedule.check_frequency_ms / 2
    } else if schedule.consecutive_zero_count > 5 {
        schedule.check_frequency_ms * 3
    } else {
        schedule.check_frequency_ms
    };

    schedule.last_run_at = Some(now);
    schedule.next_run_at = Some(now + chrono::Duration::milliseconds(delta_ms));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(check_frequency_ms: i64) -> RuleSchedule {
        RuleSchedule {
            id: 1,
            rule_id: "no-unused-vars".to_string(),
            engine: "linter".to_string(),
            enabled: true,
            priority: 5,
            check_frequency_ms,
            last_run_at: None,
            next_run_at: None,
            consecutive_zero_count: 0,
            avg_execution_time_ms: 0.0,
            avg_violations_found: 0.0
        }
    }

    #[test]
    fn six_zero_runs_back_off_to_triple_frequency() {
        let mut s = schedule(30_000);
        let now = Utc::now();
        for _ in 0..6 {
            apply_adaptive_formulas(&mut s, 0.0, 100.0, now);
        }
        assert_eq!(s.consecutive_zero_count, 6);
        let gap = s.next_run_at.unwrap() - s.last_run_at.unwrap();
        assert_eq!(gap.num_milliseconds(), 90_000);
    }

    #[test]
    fn a_noisy_run_resets_zero_count_and_halves_frequency() {
        let mut s = schedule(30_000);
        let now = Utc::now();
        for _ in 0..6 {
            apply_adaptive_formulas(&mut s, 0.0, 100.0, now);
        }
        apply_adaptive_formulas(&mut s, 10.0, 100.0, now);
        assert_eq!(s.consecutive_zero_count, 0);
        assert!(s.avg_violations_found > 5.0);
        let gap = s.next_run_at.unwrap() - s.last_run_at.unwrap();
        assert_eq!(gap.num_milliseconds(), 15_000);
    }

    #[test]
    fn steady_moderate_observations_leave_frequency_unchanged() {
        let mut s = schedule(60_000);
        let now = Utc::now();
        apply_adaptive_formulas(&mut s, 2.0, 50.0, now);
        let gap = s.next_run_at.unwrap() - s.last_run_at.unwrap();
        assert_eq!(gap.num_milliseconds(), 60_000);
    }

    #[tokio::test]
    async fn execute_next_rules_dispatches_a_due_schedule_and_completes_the_check() {
        use crate::engine::{EngineRun, FakeEngine};
        use crate::domain::{Severity, Source};

        let store = Store::open_in_memory().unwrap();
        let tracker = Arc::new(ViolationTracker::new(store.clone(), 500));
        let engine: Arc<dyn EngineAdapter> = Arc::new(FakeEngine::new("linter").with_rule_result(
            "no-unused-vars",
            EngineRun {
                violations: vec![crate::domain::ViolationInput {
                    file:     "src/lib.rs".to_string(),
                    line:     Some(10),
                    column:   None,
                    message:  "unused import".to_string(),
                    category: "correctness".to_string(),
                    severity: Severity::Warn,
                    source:   Source::Linter,
                    rule:     Some("no-unused-vars".to_string()),
                    code:     None
                }],
                files_checked: 5,
                files_with_violations: 1
            }
        ));
        let scheduler = Scheduler::new(store.clone(), tracker, vec![engine]);
        scheduler.register_rule("no-unused-vars", "linter", 1, 60_000).await.unwrap();

        let outcomes = scheduler.execute_next_rules(3).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].violations_found, 1);
        assert_eq!(outcomes[0].added, 1);

        let active = store.list_active_violations(Some("no-unused-vars")).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn timed_out_execution_is_recorded_and_treated_as_zero_violations() {
        struct SlowEngine;
        #[async_trait::async_trait]
        impl EngineAdapter for SlowEngine {
            fn name(&self) -> &str {
                "linter"
            }

            async fn run(&self, _rule_id: &str) -> AppResult<crate::engine::EngineRun> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(crate::engine::EngineRun::default())
            }
        }
        let store = Store::open_in_memory().unwrap();
        let tracker = Arc::new(ViolationTracker::new(store.clone(), 500));
        let engine: Arc<dyn EngineAdapter> = Arc::new(SlowEngine);
        let scheduler = Scheduler::new(store.clone(), tracker, vec![engine])
            .with_timeout(Duration::from_millis(10));
        scheduler.register_rule("no-unused-vars", "linter", 1, 60_000).await.unwrap();

        let outcomes = scheduler.execute_next_rules(3).await.unwrap();
        assert!(outcomes.is_empty());

        let schedules = store.get_next_rules_to_check(10).await.unwrap();
        assert_eq!(schedules.len(), 0); // next_run_at was pushed into the future
    }
}
