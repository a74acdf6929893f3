// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RundagError {
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Manifest declares zero tasks")]
    EmptyManifest,

    #[error("Cycle detected in action graph: {0}")]
    ManifestCycle(String),

    #[error("Required environment variable {0} is not set")]
    MissingEnvironment(&'static str),

    #[error("Subprocess failure for task '{task}': {source}")]
    Subprocess {
        task: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task '{task}' exceeded its deadline")]
    TaskTimeout { task: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RundagError {
    /// Wrap an OS-level failure as a per-task subprocess error.
    pub fn subprocess(task: impl Into<String>, source: std::io::Error) -> Self {
        RundagError::Subprocess {
            task: task.into(),
            source,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RundagError>;
