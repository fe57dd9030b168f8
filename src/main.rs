//! # sidequestd
//!
//! Demo binary for the [`sidequest_core`] orchestration kernel.
//!
//! Engine adapters are explicitly out of scope for the kernel itself, so
//! this binary stands up a small fleet of [`FakeEngine`] instances in
//! place of a real typechecker, linter, unused-export detector, and
//! schema-usage detector, registers one rule per engine, and drives either
//! a single `Orchestrator::run_once` cycle (`check`) or a full watch
//! controller run (`watch`).
//!
//! # Exit codes
//!
//! `check` exits `2` if any active violation is `error` severity, `1` if
//! only `warn`/`info` violations remain (or any remain at all under
//! `--strict`), `0` otherwise. `watch` exits `0` on timeout or interrupt,
//! `1` on a fatal error.

use std::{process, sync::Arc};

use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sidequest_core::{
    Config, DisplayPort, EngineAdapter, Orchestrator,
    cli::{Cli, Commands},
    display::DisplayUpdate,
    domain::{CriticalFlags, Severity, Source, Violation},
    engine::FakeEngine,
    error::AppResult,
    store::Store
};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            process::exit(1);
        }
    }
}

/// One (engine name, rule id, priority, frequency) tuple per stand-in
/// analyzer. A real deployment would register these against engines that
/// actually spawn a typechecker/linter process; see [`EngineAdapter`].
const DEMO_RULES: &[(&str, &str, i64, i64)] = &[
    ("typechecker", "strict-null-checks", 5, 60_000),
    ("linter", "no-unused-vars", 3, 30_000),
    ("unused-exports", "dead-export", 1, 120_000),
    ("schema", "schema-drift", 2, 90_000)
];

fn demo_engines() -> Vec<Arc<dyn EngineAdapter>> {
    DEMO_RULES
        .iter()
        .map(|(engine, ..)| Arc::new(FakeEngine::new(*engine)) as Arc<dyn EngineAdapter>)
        .collect()
}

async fn build_orchestrator(config: &Config) -> AppResult<Arc<Orchestrator>> {
    let store = Store::open(&config.database).await?;
    let orchestrator = Arc::new(Orchestrator::new(store, demo_engines(), config));
    for (engine, rule_id, priority, frequency_ms) in DEMO_RULES {
        orchestrator.register_rule(rule_id, engine, *priority, *frequency_ms).await?;
    }
    Ok(orchestrator)
}

async fn run() -> AppResult<i32> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config).unwrap_or_default();
    let orchestrator = build_orchestrator(&config).await?;

    match cli.command {
        Commands::Check => run_check(&orchestrator, cli.strict).await,
        Commands::Watch { data_dir } => {
            run_watch(orchestrator, data_dir, cli.target_path, cli.strict, cli.eslint_only).await
        }
    }
}

async fn run_check(orchestrator: &Orchestrator, strict: bool) -> AppResult<i32> {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("running checks...");
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = orchestrator.run_once().await;
    pb.finish_and_clear();
    result?;

    let active = orchestrator.store().list_active_violations(None).await?;
    print_report(&active);

    let highest = active.iter().map(|v| v.severity).max_by_key(severity_rank);
    let exit_code = match highest {
        Some(Severity::Error) => 2,
        Some(_) if strict => 2,
        Some(_) => 1,
        None => 0
    };
    Ok(exit_code)
}

async fn run_watch(
    orchestrator: Arc<Orchestrator>,
    data_dir: std::path::PathBuf,
    target_path: std::path::PathBuf,
    strict: bool,
    eslint_only: bool
) -> AppResult<i32> {
    let cwd = std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_else(|_| ".".to_string());
    let flags = CriticalFlags {
        target_path: target_path.display().to_string(),
        strict,
        eslint_only
    };

    let display: Arc<dyn DisplayPort> = Arc::new(TerminalDisplay);
    let controller = orchestrator.clone().start_watch(display, &data_dir, cwd, flags).await?;

    Ok(controller.run().await)
}

fn severity_rank(s: &Severity) -> u8 {
    match s {
        Severity::Info => 0,
        Severity::Warn => 1,
        Severity::Error => 2
    }
}

fn print_report(active: &[Violation]) {
    if active.is_empty() {
        println!("{}", "no active violations".green());
        return;
    }
    for v in active {
        let label = match v.severity {
            Severity::Error => "error".red().bold(),
            Severity::Warn => "warn".yellow().bold(),
            Severity::Info => "info".blue().bold()
        };
        let location = match (v.line, v.column) {
            (Some(l), Some(c)) => format!("{}:{l}:{c}", v.file_path),
            (Some(l), None) => format!("{}:{l}", v.file_path),
            _ => v.file_path.to_string()
        };
        println!("{label} [{}] {location} {} - {}", v.rule_id, source_tag(v.source), v.message);
    }
    println!("\n{} violation(s)", active.len());
}

fn source_tag(source: Source) -> &'static str {
    match source {
        Source::Typechecker => "(typechecker)",
        Source::Linter => "(linter)",
        Source::UnusedExports => "(unused-exports)",
        Source::Schema => "(schema)"
    }
}

/// Minimal terminal display for watch mode: prints one summary line per
/// cycle. A full dashboard is explicitly out of scope for the kernel;
/// this exists only so `watch` has something to look at.
struct TerminalDisplay;

#[async_trait::async_trait]
impl DisplayPort for TerminalDisplay {
    async fn update(&self, update: &DisplayUpdate) {
        println!(
            "{} check #{} - {} active violation(s)",
            "watch".cyan().bold(),
            update.checks_count,
            update.active_count
        );
    }

    async fn shutdown(&self) {
        println!("{}", "watch stopped".cyan().bold());
    }
}
