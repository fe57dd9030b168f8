//! Watch-mode lifecycle state machine: drives periodic analysis cycles,
//! session persistence, error recovery, and graceful shutdown. See spec
//! §4.4.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    display::{DisplayPort, DisplayUpdate},
    domain::{CriticalFlags, WatchSession},
    error::AppResult,
    errorlog::{ErrorLog, ErrorLogEntry},
    orchestrator::Orchestrator,
    session::{SessionStore, is_resumable, record_session_error}
};

const DEFAULT_TICK: Duration = Duration::from_millis(3_000);
const DEFAULT_SAFETY_DEADLINE: Duration = Duration::from_secs(10 * 60);
const RECOVERY_DELAY: Duration = Duration::from_secs(5);
const DISPLAY_RECENT_LIMIT: usize = 20;

/// Phases of the watch controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchPhase {
    Idle,
    Starting,
    Running,
    Analyzing,
    ShuttingDown,
    Stopped
}

impl WatchPhase {
    fn allows(self, to: WatchPhase) -> bool {
        use WatchPhase::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Running, Analyzing)
                | (Analyzing, Running)
                | (Running, ShuttingDown)
                | (Analyzing, ShuttingDown)
                | (Starting, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

/// Why the controller is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Timeout,
    Interrupt,
    Error
}

impl ShutdownReason {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Timeout | Self::Interrupt => 0,
            Self::Error => 1
        }
    }
}

/// Events observable over [`WatchController::subscribe`]; purely
/// informational, never required for correctness.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    PhaseChanged { from: WatchPhase, to: WatchPhase },
    Rejected { attempted: WatchPhase, from: WatchPhase },
    CycleCompleted { checks_count: i64, active_count: usize },
    CycleFailed { message: String },
    ShuttingDown { reason: ShutdownReason }
}

/// Lifecycle controller for continuous watch mode, built on top of an
/// [`Orchestrator`].
pub struct WatchController {
    orchestrator:          Arc<Orchestrator>,
    display:               Arc<dyn DisplayPort>,
    sessions:               SessionStore,
    error_log:             ErrorLog,
    phase:                 AsyncMutex<WatchPhase>,
    session:               AsyncMutex<WatchSession>,
    events_tx:             mpsc::UnboundedSender<WatchEvent>,
    events_rx:             AsyncMutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,
    tick:                  Duration,
    safety_deadline:       Duration,
    cwd:                   String,
    max_concurrent_checks: usize,
    stop:                  CancellationToken
}

impl WatchController {
    /// Load a resumable session or create a fresh one, then build a
    /// controller ready to `run`.
    pub async fn new(
        orchestrator: Arc<Orchestrator>,
        display: Arc<dyn DisplayPort>,
        data_dir: impl AsRef<std::path::Path>,
        cwd: impl Into<String>,
        critical_flags: CriticalFlags,
        max_concurrent_checks: usize
    ) -> AppResult<Self> {
        let cwd = cwd.into();
        let sessions = SessionStore::new(data_dir);
        let now = Utc::now();

        let session = match sessions.load()? {
            Some(existing) if is_resumable(&existing, &cwd, &critical_flags, now) => existing,
            _ => {
                let fresh = orchestrator.store().start_session(&cwd, &critical_flags).await?;
                sessions.save(&fresh)?;
                fresh
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            orchestrator,
            display,
            error_log: ErrorLog::new(&cwd),
            sessions,
            phase: AsyncMutex::new(WatchPhase::Idle),
            session: AsyncMutex::new(session),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
            tick: DEFAULT_TICK,
            safety_deadline: DEFAULT_SAFETY_DEADLINE,
            cwd,
            max_concurrent_checks,
            stop: CancellationToken::new()
        })
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_safety_deadline(mut self, deadline: Duration) -> Self {
        self.safety_deadline = deadline;
        self
    }

    /// Takes ownership of the event receiver. Callable once.
    pub async fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<WatchEvent>> {
        self.events_rx.lock().await.take()
    }

    /// External stop request (e.g. `Orchestrator::stop_watch`); equivalent
    /// to an interrupt signal.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub async fn phase(&self) -> WatchPhase {
        *self.phase.lock().await
    }

    async fn can_start_analysis(&self) -> bool {
        *self.phase.lock().await == WatchPhase::Running
    }

    async fn can_update_display(&self) -> bool {
        !matches!(*self.phase.lock().await, WatchPhase::Starting | WatchPhase::ShuttingDown)
    }

    fn emit(&self, event: WatchEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Attempt `from -> to`. Invalid transitions are surfaced as
    /// [`WatchEvent::Rejected`] rather than returned as an error — the
    /// controller must never throw.
    async fn transition(&self, to: WatchPhase) {
        let mut phase = self.phase.lock().await;
        let from = *phase;
        if from == to {
            return;
        }
        if from.allows(to) {
            *phase = to;
            drop(phase);
            self.emit(WatchEvent::PhaseChanged { from, to });
        } else {
            drop(phase);
            self.emit(WatchEvent::Rejected { attempted: to, from });
        }
    }

    /// Run watch mode to completion: one immediate cycle, then a ticker
    /// until a safety deadline, signal, or external stop request fires a
    /// shutdown. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        self.transition(WatchPhase::Starting).await;
        self.transition(WatchPhase::Running).await;

        self.run_cycle().await;

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let deadline = tokio::time::sleep(self.safety_deadline);
        tokio::pin!(deadline);

        #[cfg(unix)]
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = &mut deadline => {
                    break ShutdownReason::Timeout;
                }
                _ = tokio::signal::ctrl_c() => {
                    break ShutdownReason::Interrupt;
                }
                _ = self.stop.cancelled() => {
                    break ShutdownReason::Interrupt;
                }
                #[cfg(unix)]
                _ = sigterm.recv() => {
                    break ShutdownReason::Interrupt;
                }
            }
        };

        self.shutdown(reason).await
    }

    /// One analysis cycle: full scan → tracker → summary → session
    /// update → display update. Never panics; a failure is logged and the
    /// controller schedules a recovery attempt after five seconds.
    async fn run_cycle(&self) {
        if !self.can_start_analysis().await {
            let from = self.phase().await;
            self.emit(WatchEvent::Rejected { attempted: WatchPhase::Analyzing, from });
            return;
        }
        self.transition(WatchPhase::Analyzing).await;

        match self.orchestrator.run_once().await {
            Ok(_outcomes) => {
                let active = self
                    .orchestrator
                    .store()
                    .list_active_violations(None)
                    .await
                    .unwrap_or_default();

                let active_count = active.len();
                let checks_count = {
                    let mut session = self.session.lock().await;
                    session.total_checks += 1;
                    session.total_violations_end = active_count as i64;
                    session.configuration = summarize(&active);
                    let _ = self.sessions.save(&session);
                    let _ = self.orchestrator.store().update_session(&session).await;
                    session.total_checks
                };

                if self.can_update_display().await {
                    self.display
                        .update(&DisplayUpdate {
                            checks_count,
                            active_count,
                            recent: active.into_iter().take(DISPLAY_RECENT_LIMIT).collect()
                        })
                        .await;
                }

                self.emit(WatchEvent::CycleCompleted {
                    checks_count,
                    active_count
                });
            }
            Err(e) => {
                let checks_count = {
                    let mut session = self.session.lock().await;
                    record_session_error(&mut session, e.to_string(), "analyzing");
                    let _ = self.sessions.save(&session);
                    session.total_checks
                };

                let entry = ErrorLogEntry::new(e.to_string(), "analyzing", checks_count, self.cwd.clone());
                let _ = self.error_log.append(&entry);
                self.emit(WatchEvent::CycleFailed { message: e.to_string() });

                tokio::time::sleep(RECOVERY_DELAY).await;
            }
        }

        self.transition(WatchPhase::Running).await;
    }

    async fn shutdown(&self, reason: ShutdownReason) -> i32 {
        self.transition(WatchPhase::ShuttingDown).await;
        self.display.shutdown().await;

        {
            let mut session = self.session.lock().await;
            session.session_end = Some(Utc::now());
            let _ = self.sessions.save(&session);
            let _ = self.orchestrator.store().update_session(&session).await;
        }

        self.emit(WatchEvent::ShuttingDown { reason });
        self.transition(WatchPhase::Stopped).await;
        reason.exit_code()
    }
}

/// Tally active violations by source, category, and severity into the
/// shape of a per-cycle violation summary.
fn summarize(active: &[crate::domain::Violation]) -> serde_json::Value {
    let mut by_source: HashMap<String, i64> = HashMap::new();
    let mut by_category: HashMap<String, i64> = HashMap::new();
    let mut by_severity: HashMap<String, i64> = HashMap::new();

    for v in active {
        *by_source.entry(v.source.to_string()).or_insert(0) += 1;
        *by_category.entry(v.category.to_string()).or_insert(0) += 1;
        *by_severity.entry(v.severity.to_string()).or_insert(0) += 1;
    }

    serde_json::json!({
        "total": active.len(),
        "bySource": by_source,
        "byCategory": by_category,
        "bySeverity": by_severity
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, display::NullDisplay, engine::{EngineAdapter, FakeEngine}};

    fn flags() -> CriticalFlags {
        CriticalFlags {
            target_path: "/repo/src".to_string(),
            strict:      true,
            eslint_only: false
        }
    }

    async fn controller(dir: &std::path::Path) -> WatchController {
        let store = crate::store::Store::open_in_memory().unwrap();
        let engine: Arc<dyn EngineAdapter> = Arc::new(FakeEngine::new("linter"));
        let orchestrator = Arc::new(Orchestrator::new(store, vec![engine], &Config::default()));
        orchestrator.register_rule("no-unused-vars", "linter", 1, 60_000).await.unwrap();

        WatchController::new(orchestrator, Arc::new(NullDisplay), dir, "/repo", flags(), 3)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn run_cycle_advances_to_running_and_records_a_check() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path()).await;
        controller.run_cycle().await;
        assert_eq!(controller.phase().await, WatchPhase::Idle);

        controller.transition(WatchPhase::Starting).await;
        controller.transition(WatchPhase::Running).await;
        controller.run_cycle().await;
        assert_eq!(controller.phase().await, WatchPhase::Running);
        assert_eq!(controller.session.lock().await.total_checks, 1);
    }

    #[tokio::test]
    async fn a_tick_while_not_running_is_rejected_not_panicked() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path()).await;
        let mut events = controller.subscribe().await.unwrap();

        controller.run_cycle().await;

        let event = events.try_recv().unwrap();
        assert!(matches!(event, WatchEvent::Rejected { .. }));
    }

    #[tokio::test]
    async fn shutdown_reports_exit_code_per_reason() {
        assert_eq!(ShutdownReason::Timeout.exit_code(), 0);
        assert_eq!(ShutdownReason::Interrupt.exit_code(), 0);
        assert_eq!(ShutdownReason::Error.exit_code(), 1);
    }

    #[tokio::test]
    async fn request_stop_cancels_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller(dir.path()).await;
        assert!(!controller.stop.is_cancelled());
        controller.request_stop();
        assert!(controller.stop.is_cancelled());
    }
}
