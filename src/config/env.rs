// src/config/env.rs

//! Environment-supplied settings.
//!
//! The invoker is configured entirely through `__OW_*` environment variables,
//! matching the runtime container contract: the action root directory, the
//! runtime interpreter binary, and the launcher script it executes. Absence
//! of a required variable is a fatal startup error.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::errors::{Result, RundagError};

pub const ENV_ACTIONS: &str = "__OW_ACTIONS";
pub const ENV_ACTION_BIN: &str = "__OW_ACTION_BIN";
pub const ENV_ACTION_LAUNCHER: &str = "__OW_ACTION_LAUNCHER";
pub const ENV_ACTION_EXT: &str = "__OW_ACTION_EXT";
pub const ENV_ACTION_ENTRY_POINT: &str = "__OW_ACTION_ENTRY_POINT";

/// Resolved environment configuration for one invoker process.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    /// Directory containing the action artifacts and `action-manifest.json`.
    pub action_root: PathBuf,
    /// Runtime interpreter binary (e.g. `/usr/bin/python3`).
    pub action_bin: PathBuf,
    /// Launcher script handed to the interpreter; it receives the task key
    /// as its first argument.
    pub launcher: PathBuf,
    /// Action file extension, required only when no manifest file exists and
    /// the single-task fallback document must be synthesized.
    pub action_ext: Option<String>,
    /// Entry point name for the single-task fallback (default `main`).
    pub entry_point: String,
}

impl EnvSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            action_root: PathBuf::from(required(ENV_ACTIONS)?),
            action_bin: PathBuf::from(required(ENV_ACTION_BIN)?),
            launcher: PathBuf::from(required(ENV_ACTION_LAUNCHER)?),
            action_ext: env::var(ENV_ACTION_EXT).ok(),
            entry_point: env::var(ENV_ACTION_ENTRY_POINT)
                .unwrap_or_else(|_| "main".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| RundagError::MissingEnvironment(name))
}

/// Snapshot of the environment exported to task subprocesses: every `__OW_*`
/// variable plus `PATH`. Children otherwise run with a cleared environment.
pub fn child_environment() -> Vec<(OsString, OsString)> {
    env::vars_os()
        .filter(|(key, _)| key.to_string_lossy().starts_with("__OW_") || key == "PATH")
        .collect()
}
