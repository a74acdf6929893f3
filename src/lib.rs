// src/lib.rs

//! rundag: execution engine of a serverless-action invoker.
//!
//! Given an action's declared component graph (named sub-functions plus
//! declared dependencies) and one invocation payload, `rundag` executes each
//! sub-function exactly once, in dependency order, each in an isolated
//! subprocess, feeding it the combined outputs of its dependencies, with
//! partial concurrency where the graph allows. One OS thread drives each
//! subprocess through a finite-state machine; a round-robin, time-sliced
//! scheduler keeps concurrently waiting driver threads fair.

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod sched;

use std::io::Read;
use std::time::Duration;

use crate::cli::CliArgs;
use crate::config::{EnvSettings, child_environment, load_document};
use crate::dag::ActionManifest;
use crate::engine::{ExecutionContext, InvocationOutcome};
use crate::exec::SpawnSpec;
use crate::sched::{DEFAULT_BUDGET, RoundRobin};

pub use crate::errors::{Result, RundagError};

/// Run one invocation end to end: read configuration from the environment,
/// load and validate the manifest, execute the graph, return the outcome.
///
/// With `--dry-run` the parsed graph is printed and nothing is spawned; the
/// returned outcome carries a null result.
pub fn run(args: &CliArgs) -> Result<InvocationOutcome> {
    let mut settings = EnvSettings::from_env()?;
    if let Some(root) = &args.action_root {
        settings.action_root = root.clone();
    }

    let mut document = load_document(&settings)?;
    if let Some(limit) = args.concurrency {
        document.concurrency = limit.max(1);
    }
    let manifest = ActionManifest::build(&document, &settings.action_root)?;

    if args.dry_run {
        print_dry_run(&manifest);
        return Ok(InvocationOutcome {
            ok: true,
            result: serde_json::Value::Null,
        });
    }

    let payload = read_payload(&args.payload)?;
    let spawn = SpawnSpec {
        bin: settings.action_bin.clone(),
        launcher: settings.launcher.clone(),
        action_root: settings.action_root.clone(),
    };
    let context = ExecutionContext::new(
        manifest,
        spawn,
        child_environment(),
        payload,
        RoundRobin::new(DEFAULT_BUDGET),
        Duration::from_secs(args.timeout_secs),
    );
    context.run()
}

fn read_payload(arg: &str) -> Result<String> {
    let raw = if arg == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        arg.to_string()
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Ok("{}".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn print_dry_run(manifest: &ActionManifest) {
    println!(
        "tasks: {} (concurrency {})",
        manifest.len(),
        manifest.concurrency()
    );
    for relation in manifest.relations() {
        let deps: Vec<&str> = relation.dependencies().iter().map(|d| d.key()).collect();
        println!(
            "  {} (depth {}) <- [{}]  {}",
            relation.key(),
            relation.depth(),
            deps.join(", "),
            relation.path().display()
        );
    }
}
