// src/config/mod.rs

//! Configuration layer: environment settings and the manifest document.
//!
//! - [`env`] reads the `__OW_*` environment variables that locate the action
//!   artifacts and the runtime launcher.
//! - [`model`] is the serde model of `action-manifest.json`.
//! - [`loader`] reads the document from the action root, falling back to a
//!   synthesized single-task document when no manifest file exists.
//! - [`validate`] rejects empty, dangling and cyclic documents before any
//!   graph is built or any subprocess is spawned.

pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use env::{EnvSettings, child_environment};
pub use loader::{load_document, manifest_path};
pub use model::{ManifestDocument, TaskEntry};
pub use validate::validate_document;
