//! Document loading and graph construction against real files.

use std::fs;
use std::path::PathBuf;

use rundag::config::{EnvSettings, load_document};
use rundag::dag::ActionManifest;
use rundag::errors::RundagError;
use rundag_test_utils::builders::ManifestBuilder;

fn settings(root: &std::path::Path, ext: Option<&str>) -> EnvSettings {
    EnvSettings {
        action_root: root.to_path_buf(),
        action_bin: PathBuf::from("/bin/sh"),
        launcher: root.join("launcher.sh"),
        action_ext: ext.map(str::to_string),
        entry_point: "main".to_string(),
    }
}

#[test]
fn loads_and_builds_a_manifest_file() {
    let dir = tempfile::tempdir().unwrap();
    ManifestBuilder::new()
        .task("a", "a.sh", &[])
        .task("b", "b.sh", &["a"])
        .concurrency(2)
        .write(dir.path());

    let document = load_document(&settings(dir.path(), None)).unwrap();
    assert!(document.keyed);
    assert_eq!(document.concurrency, 2);

    let manifest = ActionManifest::build(&document, dir.path()).unwrap();
    assert_eq!(manifest.len(), 2);
    assert_eq!(
        manifest.by_key("b").unwrap().path(),
        dir.path().join("b.sh")
    );
}

#[test]
fn missing_manifest_synthesizes_the_single_task_fallback() {
    let dir = tempfile::tempdir().unwrap();

    let document = load_document(&settings(dir.path(), Some("sh"))).unwrap();
    assert!(!document.keyed);
    assert_eq!(document.tasks.len(), 1);
    assert_eq!(document.tasks["main"].file, "main.sh");
    assert!(document.tasks["main"].depends.is_empty());
}

#[test]
fn missing_manifest_without_extension_is_a_startup_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = load_document(&settings(dir.path(), None)).unwrap_err();
    assert!(matches!(err, RundagError::MissingEnvironment(name) if name == "__OW_ACTION_EXT"));
}

#[test]
fn dangling_dependency_fails_before_any_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    ManifestBuilder::new()
        .task("a", "a.sh", &["ghost"])
        .write(dir.path());

    let document = load_document(&settings(dir.path(), None)).unwrap();
    let err = ActionManifest::build(&document, dir.path()).unwrap_err();
    assert!(matches!(err, RundagError::MalformedManifest(_)));
}

#[test]
fn cyclic_document_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    ManifestBuilder::new()
        .task("a", "a.sh", &["b"])
        .task("b", "b.sh", &["a"])
        .write(dir.path());

    let document = load_document(&settings(dir.path(), None)).unwrap();
    let err = ActionManifest::build(&document, dir.path()).unwrap_err();
    assert!(matches!(err, RundagError::ManifestCycle(_)));
}

#[test]
fn garbage_json_is_a_malformed_manifest() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("action-manifest.json"), "[1, 2, 3]").unwrap();

    let err = load_document(&settings(dir.path(), None)).unwrap_err();
    assert!(matches!(err, RundagError::MalformedManifest(_)));
}
