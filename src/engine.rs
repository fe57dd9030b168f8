//! External collaborator boundary for analysis engines.
//!
//! Spawning a type checker, style linter, unused-export detector, or
//! schema-usage detector and parsing its textual output into
//! [`ViolationInput`] is explicitly out of scope for the orchestration
//! kernel — the kernel only consumes violations through this port.

use async_trait::async_trait;

use crate::{domain::ViolationInput, error::AppResult};

/// One invocation of an analysis engine against a target source tree.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Stable identifier used in `RuleCheck.engine` and log output, e.g.
    /// `"typechecker"`, `"linter"`.
    fn name(&self) -> &str;

    /// Run the engine for `rule_id` and return the violations it found.
    /// Errors here become `Scheduler::fail_rule_check` calls, not process
    /// failures.
    async fn run(&self, rule_id: &str) -> AppResult<EngineRun>;
}

/// Result of one [`EngineAdapter::run`] call.
#[derive(Debug, Clone, Default)]
pub struct EngineRun {
    pub violations:            Vec<ViolationInput>,
    pub files_checked:         i64,
    pub files_with_violations: i64
}

/// In-memory test double: returns a fixed, optionally per-rule, canned
/// response. Used by the demo binary and by scheduler/orchestrator tests
/// in place of a real analyzer process.
pub struct FakeEngine {
    name:     String,
    response: std::sync::Mutex<std::collections::HashMap<String, AppResult<EngineRun>>>,
    default:  EngineRun
}

impl FakeEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:     name.into(),
            response: std::sync::Mutex::new(std::collections::HashMap::new()),
            default:  EngineRun::default()
        }
    }

    /// Queue the exact violations `rule_id` should return on its next run.
    pub fn with_rule_result(self, rule_id: impl Into<String>, run: EngineRun) -> Self {
        self.response
            .lock()
            .expect("fake engine mutex poisoned")
            .insert(rule_id.into(), Ok(run));
        self
    }

    /// Queue an error for `rule_id`'s next run (simulates an engine
    /// crash or malformed output).
    pub fn with_rule_error(self, rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.response
            .lock()
            .expect("fake engine mutex poisoned")
            .insert(rule_id.into(), Err(crate::error::engine_error(message.into())));
        self
    }
}

#[async_trait]
impl EngineAdapter for FakeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, rule_id: &str) -> AppResult<EngineRun> {
        let mut guard = self.response.lock().expect("fake engine mutex poisoned");
        match guard.remove(rule_id) {
            Some(result) => result,
            None => Ok(self.default.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Severity, Source};

    #[tokio::test]
    async fn fake_engine_returns_queued_result_once() {
        let engine = FakeEngine::new("linter").with_rule_result(
            "no-unused-vars",
            EngineRun {
                violations:            vec![ViolationInput {
                    file:     "src/lib.rs".to_string(),
                    line:     Some(1),
                    column:   None,
                    message:  "unused".to_string(),
                    category: "correctness".to_string(),
                    severity: Severity::Warn,
                    source:   Source::Linter,
                    rule:     Some("no-unused-vars".to_string()),
                    code:     None
                }],
                files_checked:         1,
                files_with_violations: 1
            }
        );
        let run = engine.run("no-unused-vars").await.unwrap();
        assert_eq!(run.violations.len(), 1);

        let second = engine.run("no-unused-vars").await.unwrap();
        assert!(second.violations.is_empty());
    }

    #[tokio::test]
    async fn fake_engine_returns_queued_error() {
        let engine = FakeEngine::new("typechecker").with_rule_error("strict-null", "crashed");
        let result = engine.run("strict-null").await;
        assert!(result.is_err());
    }
}
