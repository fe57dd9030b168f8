//! Integration tests for the sidequestd binary.

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::tempdir;

fn cmd() -> Command {
    cargo_bin_cmd!("sidequestd")
}

#[test]
fn test_check_success_on_an_empty_store() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("sidequest.db");
    let config_path = dir.path().join("sidequest.toml");
    std::fs::write(&config_path, format!("[database]\npath = \"{}\"\n", db_path.display())).unwrap();

    cmd()
        .args(["--config", config_path.to_str().unwrap(), "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no active violations"));
}

#[test]
fn test_check_falls_back_to_defaults_when_config_is_missing() {
    let dir = tempdir().unwrap();
    let missing_config = dir.path().join("nonexistent.toml");

    cmd()
        .args(["--config", missing_config.to_str().unwrap(), "check"])
        .current_dir(dir.path())
        .assert()
        .success();
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_watch_exits_zero_on_a_short_safety_deadline() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("sidequest.db");
    let config_path = dir.path().join("sidequest.toml");
    std::fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n[watch]\ninterval_ms = 50\n",
            db_path.display()
        )
    )
    .unwrap();

    // The demo binary doesn't expose a safety-deadline override, so this
    // test relies on ctrl-c's absence and a short timeout window instead;
    // assert_cmd has no built-in "kill after" helper, so we just check
    // that the process starts cleanly when interrupted immediately.
    let mut child = cmd()
        .args(["--config", config_path.to_str().unwrap(), "watch", "--data-dir"])
        .arg(dir.path().join(".sidequest"))
        .spawn()
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(300));
    child.kill().unwrap();
    child.wait().unwrap();
}
