// src/config/loader.rs

use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::config::env::{ENV_ACTION_EXT, EnvSettings};
use crate::config::model::ManifestDocument;
use crate::errors::{Result, RundagError};

/// Well-known manifest file name inside the action root.
pub const MANIFEST_FILE: &str = "action-manifest.json";

/// Path of the manifest document for the given settings.
pub fn manifest_path(settings: &EnvSettings) -> PathBuf {
    settings.action_root.join(MANIFEST_FILE)
}

/// Load the manifest document for this action.
///
/// This only performs JSON deserialization; it does **not** perform semantic
/// validation (dangling dependencies, cycles). That happens in
/// [`crate::dag::ActionManifest::build`], before any subprocess is spawned.
///
/// When no manifest file exists, the action is a plain single-function
/// action: a document with one entry point (`main.<ext>`, no dependencies)
/// is synthesized from the environment.
pub fn load_document(settings: &EnvSettings) -> Result<ManifestDocument> {
    let path = manifest_path(settings);
    if path.exists() {
        debug!(path = %path.display(), "loading manifest document");
        let contents = fs::read_to_string(&path)?;
        return ManifestDocument::from_json_str(&contents);
    }

    let ext = settings
        .action_ext
        .as_deref()
        .ok_or(RundagError::MissingEnvironment(ENV_ACTION_EXT))?;
    let file = format!("main.{ext}");
    debug!(
        entry_point = %settings.entry_point,
        file = %file,
        "no manifest file; synthesizing single-task document"
    );
    Ok(ManifestDocument::single_task(&settings.entry_point, file))
}
