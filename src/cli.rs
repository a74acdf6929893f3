// src/cli.rs

//! Command-line interface definitions using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Execute one serverless action invocation: build the action's task graph
/// from `action-manifest.json` and run every task in its own subprocess.
#[derive(Debug, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Run an action's task graph, one subprocess per task"
)]
pub struct CliArgs {
    /// Invocation payload: inline JSON, or `-` to read it from stdin.
    #[arg(default_value = "{}")]
    pub payload: String,

    /// Override the action root directory (`__OW_ACTIONS`).
    #[arg(long)]
    pub action_root: Option<PathBuf>,

    /// Override the manifest's concurrency limit.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-task deadline in seconds, bounding the readiness handshake and
    /// the wait for a task's output.
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Parse and print the task graph without spawning any subprocess.
    #[arg(long)]
    pub dry_run: bool,

    /// Log verbosity (overrides the RUNDAG_LOG environment variable).
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,
}
