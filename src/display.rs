//! Terminal rendering boundary. Dashboard layout, color scheme, and
//! background-luminance detection are explicitly out of scope for the
//! orchestration kernel; the kernel only pushes updates through this port.

use async_trait::async_trait;

use crate::domain::Violation;

/// Per-cycle summary handed to the display after an analysis cycle.
#[derive(Debug, Clone, Default)]
pub struct DisplayUpdate {
    pub checks_count: i64,
    pub active_count: usize,
    pub recent:       Vec<Violation>
}

/// Rendering surface consulted by [`crate::watch::WatchController`].
/// Updates are only pushed when `can_update()` is true: display updates
/// are permitted only outside the `Starting`/`Shutting-down` phases.
#[async_trait]
pub trait DisplayPort: Send + Sync {
    async fn update(&self, update: &DisplayUpdate);

    async fn shutdown(&self);
}

/// No-op display used by the demo binary's one-shot `check` command and
/// by tests — a full terminal dashboard is explicitly out of scope.
#[derive(Debug, Default)]
pub struct NullDisplay;

#[async_trait]
impl DisplayPort for NullDisplay {
    async fn update(&self, _update: &DisplayUpdate) {}

    async fn shutdown(&self) {}
}
