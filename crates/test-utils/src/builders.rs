#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rundag::config::ManifestDocument;
use serde_json::{Map, Value, json};

/// Builder for manifest documents to simplify test setup.
pub struct ManifestBuilder {
    entries: Map<String, Value>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self {
            entries: Map::new(),
        }
    }

    /// Declare one task with the given artifact file and dependency keys.
    pub fn task(mut self, name: &str, file: &str, depends: &[&str]) -> Self {
        self.entries.insert(
            name.to_string(),
            json!({ "file": file, "depends": depends }),
        );
        self
    }

    pub fn concurrency(mut self, limit: u64) -> Self {
        self.entries
            .insert("__OW_NUM_CONCURRENCY".to_string(), json!(limit));
        self
    }

    /// Serialized document text, as it would appear in
    /// `action-manifest.json`.
    pub fn to_json(&self) -> String {
        Value::Object(self.entries.clone()).to_string()
    }

    /// Write the document as `<dir>/action-manifest.json`.
    pub fn write(&self, dir: &Path) -> PathBuf {
        let path = dir.join("action-manifest.json");
        fs::write(&path, self.to_json()).expect("Failed to write manifest document");
        path
    }

    pub fn build(self) -> ManifestDocument {
        ManifestDocument::from_value(Value::Object(self.entries))
            .expect("Failed to build valid document from builder")
    }
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
