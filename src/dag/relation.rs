// src/dag/relation.rs

//! One node of the action dependency graph.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// A graph node: one sub-function of the action, its declared dependencies
/// and its (eventually) computed result.
///
/// The value is guarded by a per-relation lock: several reader threads may
/// poll it while one writer thread completes it. An empty value means "not
/// yet computed"; it transitions to non-empty exactly once and never back.
#[derive(Debug)]
pub struct Relation {
    key: String,
    path: PathBuf,
    dependencies: Vec<Arc<Relation>>,
    depth: usize,
    value: Mutex<String>,
}

impl Relation {
    /// Create a relation. Dependencies must already exist; depth is
    /// 1 + max(dependency depths), or 1 for a leaf.
    pub fn new(key: String, path: PathBuf, dependencies: Vec<Arc<Relation>>) -> Self {
        let depth = 1 + dependencies.iter().map(|d| d.depth()).max().unwrap_or(0);
        Self {
            key,
            path,
            dependencies,
            depth,
            value: Mutex::new(String::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Topological tie-break for manifest ordering; not used for scheduling
    /// correctness.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn dependencies(&self) -> &[Arc<Relation>] {
        &self.dependencies
    }

    /// Whether the value has been computed.
    pub fn is_computed(&self) -> bool {
        !lock_value(&self.value).is_empty()
    }

    /// Snapshot the computed value, if any. The lock is held only for the
    /// clone.
    pub fn value_snapshot(&self) -> Option<String> {
        let guard = lock_value(&self.value);
        if guard.is_empty() {
            None
        } else {
            Some(guard.clone())
        }
    }

    /// Store the computed value. Values transition unset -> set exactly
    /// once; a second store is a caller bug.
    pub fn set_value(&self, value: String) {
        debug_assert!(!value.is_empty(), "relation values must be non-empty");
        let mut guard = lock_value(&self.value);
        debug_assert!(guard.is_empty(), "relation value set twice");
        *guard = value;
    }
}

// A poisoned value lock only means a sibling thread panicked mid-clone; the
// string itself is always in a consistent state.
fn lock_value(value: &Mutex<String>) -> std::sync::MutexGuard<'_, String> {
    value.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_depth_is_one() {
        let rel = Relation::new("a".into(), PathBuf::from("a.py"), vec![]);
        assert_eq!(rel.depth(), 1);
        assert!(!rel.is_computed());
        assert_eq!(rel.value_snapshot(), None);
    }

    #[test]
    fn depth_is_one_plus_max_dependency_depth() {
        let a = Arc::new(Relation::new("a".into(), PathBuf::from("a.py"), vec![]));
        let b = Arc::new(Relation::new(
            "b".into(),
            PathBuf::from("b.py"),
            vec![a.clone()],
        ));
        let c = Relation::new("c".into(), PathBuf::from("c.py"), vec![a, b]);
        assert_eq!(c.depth(), 3);
    }

    #[test]
    fn value_transitions_unset_to_set() {
        let rel = Relation::new("a".into(), PathBuf::from("a.py"), vec![]);
        rel.set_value("{\"ok\":true}".to_string());
        assert!(rel.is_computed());
        assert_eq!(rel.value_snapshot().as_deref(), Some("{\"ok\":true}"));
    }
}
