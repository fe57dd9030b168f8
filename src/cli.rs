use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// sidequestd - continuous code-quality orchestration kernel
#[derive(Parser, Debug)]
#[command(name = "sidequestd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file; missing file falls back to defaults
    #[arg(short, long, default_value = "sidequest.toml", global = true)]
    pub config: PathBuf,

    /// Target source tree the registered rules run against (critical flag)
    #[arg(short, long, default_value = ".", global = true)]
    pub target_path: PathBuf,

    /// Treat warnings as errors for the purpose of the process exit code
    #[arg(long, global = true)]
    pub strict: bool,

    /// Run only lint-style rules (critical flag carried from the session schema)
    #[arg(long, global = true)]
    pub eslint_only: bool,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scheduler cycle over the registered rules and print a report
    Check,
    /// Run continuously: immediate cycle, then a ticker until a safety
    /// deadline, interrupt signal, or fatal error
    Watch {
        /// Directory for the watch-session file (spec's `<dataDir>`)
        #[arg(long, default_value = ".sidequest")]
        data_dir: PathBuf
    }
}
