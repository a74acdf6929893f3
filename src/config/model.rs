// src/config/model.rs

//! Serde model of the manifest document.
//!
//! `action-manifest.json` is a single JSON object keyed by task name:
//!
//! ```json
//! {
//!     "a": { "file": "a.py", "depends": [] },
//!     "b": { "file": "b.py", "depends": ["a"] },
//!     "__OW_NUM_CONCURRENCY": 2
//! }
//! ```
//!
//! The reserved `__OW_NUM_CONCURRENCY` key caps how many tasks may be
//! actively executing at once (default 1).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{Result, RundagError};

/// Reserved document key carrying the concurrency limit.
pub const CONCURRENCY_KEY: &str = "__OW_NUM_CONCURRENCY";

/// One declared task: its artifact file and its dependency keys.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub file: String,
    #[serde(default)]
    pub depends: Vec<String>,
}

/// Parsed manifest document.
#[derive(Debug, Clone)]
pub struct ManifestDocument {
    /// Declared tasks, in deterministic (lexicographic) order.
    pub tasks: BTreeMap<String, TaskEntry>,
    /// How many tasks may be actively executing at once.
    pub concurrency: usize,
    /// Whether the document came from a manifest file. Keyed documents
    /// produce a result object keyed by task name; the single-task fallback
    /// returns the task's value directly.
    pub keyed: bool,
}

impl ManifestDocument {
    /// Parse a manifest document from its JSON text.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(contents)?;
        Self::from_value(value)
    }

    /// Parse a manifest document from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(RundagError::MalformedManifest(
                "manifest document must be a JSON object keyed by task name".to_string(),
            ));
        };

        let mut tasks = BTreeMap::new();
        let mut concurrency = 1usize;

        for (key, entry) in map {
            if key == CONCURRENCY_KEY {
                let n = entry.as_u64().ok_or_else(|| {
                    RundagError::MalformedManifest(format!(
                        "{CONCURRENCY_KEY} must be a positive integer"
                    ))
                })?;
                if n == 0 {
                    return Err(RundagError::MalformedManifest(format!(
                        "{CONCURRENCY_KEY} must be >= 1 (got 0)"
                    )));
                }
                concurrency = n as usize;
                continue;
            }

            let task: TaskEntry = serde_json::from_value(entry).map_err(|e| {
                RundagError::MalformedManifest(format!("task '{key}': {e}"))
            })?;
            tasks.insert(key, task);
        }

        Ok(Self {
            tasks,
            concurrency,
            keyed: true,
        })
    }

    /// Synthesize the single-task fallback document used when no manifest
    /// file exists: one entry point, no dependencies.
    pub fn single_task(entry_point: &str, file: String) -> Self {
        let mut tasks = BTreeMap::new();
        tasks.insert(
            entry_point.to_string(),
            TaskEntry {
                file,
                depends: Vec::new(),
            },
        );
        Self {
            tasks,
            concurrency: 1,
            keyed: false,
        }
    }
}
