//! # sidequest-core
//!
//! Orchestration kernel for a continuous code-quality pipeline: a
//! persistent violation store with deterministic deduplication and delta
//! tracking, an adaptive rule scheduler, a violation tracker, and a
//! watch-mode controller that drives periodic analysis cycles with
//! session persistence and graceful shutdown.
//!
//! Engine adapters (type checkers, linters, and the like) and terminal
//! rendering are explicitly out of scope; this crate defines the
//! [`engine::EngineAdapter`] and [`display::DisplayPort`] traits at those
//! boundaries and composes everything else through [`orchestrator::Orchestrator`].

pub mod analysis;
pub mod cli;
pub mod config;
pub mod display;
pub mod domain;
pub mod engine;
pub mod error;
pub mod errorlog;
pub mod orchestrator;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tracker;
pub mod watch;

pub use analysis::AnalysisService;
pub use config::Config;
pub use display::{DisplayPort, NullDisplay};
pub use engine::{EngineAdapter, EngineRun};
pub use error::{AppError, AppResult};
pub use orchestrator::Orchestrator;
pub use scheduler::Scheduler;
pub use store::Store;
pub use tracker::ViolationTracker;
pub use watch::WatchController;
