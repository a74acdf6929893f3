// src/dag/manifest.rs

//! The action manifest: graph container plus traversal policy.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::model::ManifestDocument;
use crate::config::validate::validate_document;
use crate::dag::relation::Relation;
use crate::errors::{Result, RundagError};

/// Ordered sequence of owned relations plus the invocation concurrency
/// limit.
///
/// Invariants, established by [`ActionManifest::build`]:
/// - exactly one relation per declared task,
/// - every dependency reference resolves to another element of the same
///   sequence (insertion is post-order on the dependency graph),
/// - the sequence is sorted by descending depth. The ordering is a
///   scheduling hint only, not a correctness requirement.
#[derive(Debug)]
pub struct ActionManifest {
    relations: Vec<Arc<Relation>>,
    concurrency: usize,
    keyed: bool,
}

impl ActionManifest {
    /// Build the dependency graph from a manifest document.
    ///
    /// The document is validated first (zero tasks, dangling dependency
    /// keys, self-dependencies, cycles), so construction never spawns a
    /// subprocess for a bad document and the traversal below never sees a
    /// cycle.
    pub fn build(doc: &ManifestDocument, action_root: &Path) -> Result<Self> {
        validate_document(doc)?;

        let mut relations: Vec<Arc<Relation>> = Vec::with_capacity(doc.tasks.len());
        for key in doc.tasks.keys() {
            emplace(key, doc, action_root, &mut relations)?;
        }

        // Root-most (most dependent) relations first.
        relations.sort_by(|a, b| b.depth().cmp(&a.depth()));

        debug!(
            tasks = relations.len(),
            concurrency = doc.concurrency,
            "built action manifest"
        );

        Ok(Self {
            relations,
            concurrency: doc.concurrency,
            keyed: doc.keyed,
        })
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Whether the invocation result should be keyed by task name.
    pub fn keyed(&self) -> bool {
        self.keyed
    }

    pub fn relations(&self) -> impl Iterator<Item = &Arc<Relation>> {
        self.relations.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Arc<Relation>> {
        self.relations.get(idx)
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.key() == key)
    }

    pub fn by_key(&self, key: &str) -> Option<&Arc<Relation>> {
        self.relations.iter().find(|r| r.key() == key)
    }

    /// Whether every relation's value has been computed.
    pub fn all_computed(&self) -> bool {
        self.relations.iter().all(|r| r.is_computed())
    }

    /// Select the relation that should be worked on next, starting from
    /// `key` with fairness offset `offset`.
    ///
    /// Policy:
    /// 1. every value already set -> `None` (no more work);
    /// 2. the relation named `key` is already computed -> advance to the
    ///    next relation in sequence (wrapping);
    /// 3. otherwise scan its dependencies circularly starting at
    ///    `offset % deps.len()`; the first dependency lacking a value
    ///    becomes the new cursor;
    /// 4. zero dependencies, or all dependency values set -> that relation
    ///    is immediately runnable; return it.
    ///
    /// The walk is iterative (no recursion, so deep graphs cannot overflow
    /// the stack). Values only move unset -> set, so every hop either
    /// advances past a computed relation or strictly decreases depth; the
    /// hop cap is a hard stop against concurrent completion races.
    pub fn next(&self, key: &str, offset: usize) -> Option<Arc<Relation>> {
        if self.all_computed() {
            return None;
        }

        let mut idx = self.index_of(key)?;
        let cap = self.relations.len() * (self.relations.len() + 2);
        for _ in 0..cap {
            let rel = &self.relations[idx];

            if rel.is_computed() {
                idx = (idx + 1) % self.relations.len();
                continue;
            }

            let deps = rel.dependencies();
            if deps.is_empty() {
                return Some(Arc::clone(rel));
            }

            let start = offset % deps.len();
            let mut descend = None;
            for hop in 0..deps.len() {
                let dep = &deps[(start + hop) % deps.len()];
                if !dep.is_computed() {
                    descend = Some(dep.key());
                    break;
                }
            }

            match descend {
                // Dependencies always resolve within the sequence.
                Some(dep_key) => idx = self.index_of(dep_key)?,
                None => return Some(Arc::clone(rel)),
            }
        }

        None
    }
}

/// Insert `key` and (first) all of its dependencies into `relations`.
///
/// Explicit work-list rendering of the post-order traversal: a node is
/// constructed only once every one of its dependencies is present, and a key
/// already present is never re-inserted, so repeated references share one
/// relation.
fn emplace(
    key: &str,
    doc: &ManifestDocument,
    action_root: &Path,
    relations: &mut Vec<Arc<Relation>>,
) -> Result<()> {
    let mut stack: Vec<String> = vec![key.to_string()];

    while let Some(top) = stack.last().cloned() {
        if relations.iter().any(|r| r.key() == top) {
            stack.pop();
            continue;
        }

        let entry = doc.tasks.get(&top).ok_or_else(|| {
            RundagError::MalformedManifest(format!("unknown task key '{top}'"))
        })?;

        let missing: Vec<&String> = entry
            .depends
            .iter()
            .filter(|d| !relations.iter().any(|r| r.key() == d.as_str()))
            .collect();

        if missing.is_empty() {
            let mut dependencies = Vec::with_capacity(entry.depends.len());
            for dep in entry.depends.iter() {
                let rel = relations
                    .iter()
                    .find(|r| r.key() == dep.as_str())
                    .ok_or_else(|| {
                        RundagError::MalformedManifest(format!(
                            "dependency '{dep}' of task '{top}' not constructed"
                        ))
                    })?;
                dependencies.push(Arc::clone(rel));
            }
            relations.push(Arc::new(Relation::new(
                top,
                action_root.join(&entry.file),
                dependencies,
            )));
            stack.pop();
        } else {
            for dep in missing {
                stack.push(dep.clone());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::model::ManifestDocument;

    fn doc(entries: &[(&str, &[&str])]) -> ManifestDocument {
        let mut map = serde_json::Map::new();
        for (name, deps) in entries {
            map.insert(
                name.to_string(),
                serde_json::json!({ "file": format!("{name}.py"), "depends": deps }),
            );
        }
        ManifestDocument::from_value(serde_json::Value::Object(map)).expect("valid document")
    }

    fn build(entries: &[(&str, &[&str])]) -> ActionManifest {
        ActionManifest::build(&doc(entries), &PathBuf::from("/actions")).expect("valid manifest")
    }

    #[test]
    fn build_produces_one_relation_per_task() {
        let manifest = build(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
        ]);
        assert_eq!(manifest.len(), 3);
        for key in ["a", "b", "c"] {
            assert_eq!(
                manifest.relations().filter(|r| r.key() == key).count(),
                1,
                "task {key} should appear exactly once"
            );
        }
    }

    #[test]
    fn dependencies_resolve_within_the_sequence() {
        let manifest = build(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        for rel in manifest.relations() {
            for dep in rel.dependencies() {
                let in_sequence = manifest
                    .relations()
                    .any(|r| Arc::ptr_eq(r, dep));
                assert!(in_sequence, "dependency {} must be shared", dep.key());
            }
        }
    }

    #[test]
    fn depth_is_monotonic_over_dependencies() {
        let manifest = build(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &["c"]),
        ]);
        for rel in manifest.relations() {
            for dep in rel.dependencies() {
                assert!(rel.depth() > dep.depth());
            }
        }
    }

    #[test]
    fn sequence_is_sorted_by_descending_depth() {
        let manifest = build(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let depths: Vec<usize> = manifest.relations().map(|r| r.depth()).collect();
        let mut sorted = depths.clone();
        sorted.sort_by(|x, y| y.cmp(x));
        assert_eq!(depths, sorted);
    }

    #[test]
    fn shared_dependency_is_constructed_once() {
        // Diamond: d depends on b and c, both depend on a.
        let manifest = build(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ]);
        let b = manifest.by_key("b").unwrap();
        let c = manifest.by_key("c").unwrap();
        assert!(Arc::ptr_eq(&b.dependencies()[0], &c.dependencies()[0]));
    }

    #[test]
    fn next_returns_leaf_for_unready_chain() {
        let manifest = build(&[("a", &[]), ("b", &["a"])]);
        let next = manifest.next("b", 0).expect("work remains");
        assert_eq!(next.key(), "a");
    }

    #[test]
    fn next_returns_relation_itself_once_deps_computed() {
        let manifest = build(&[("a", &[]), ("b", &["a"])]);
        manifest.by_key("a").unwrap().set_value("{}".to_string());
        let next = manifest.next("b", 0).expect("work remains");
        assert_eq!(next.key(), "b");
    }

    #[test]
    fn next_skips_computed_relations() {
        let manifest = build(&[("a", &[]), ("b", &[])]);
        let first = manifest.next(manifest.get(0).unwrap().key(), 0).unwrap();
        first.set_value("{}".to_string());
        let second = manifest
            .next(manifest.get(0).unwrap().key(), 0)
            .expect("one task left");
        assert_ne!(second.key(), first.key());
    }

    #[test]
    fn next_returns_none_when_everything_is_computed() {
        let manifest = build(&[("a", &[]), ("b", &["a"])]);
        for rel in manifest.relations() {
            rel.set_value("{}".to_string());
        }
        assert!(manifest.next("a", 0).is_none());
        assert!(manifest.next("b", 3).is_none());
    }

    #[test]
    fn next_offset_rotates_between_unready_dependencies() {
        let manifest = build(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let first = manifest.next("c", 0).expect("work remains");
        let second = manifest.next("c", 1).expect("work remains");
        assert_ne!(first.key(), second.key());
        assert!(first.dependencies().is_empty());
        assert!(second.dependencies().is_empty());
    }

    #[test]
    fn build_rejects_unknown_dependency() {
        let document = doc(&[("a", &["ghost"])]);
        let err = ActionManifest::build(&document, &PathBuf::from("/actions")).unwrap_err();
        assert!(matches!(err, RundagError::MalformedManifest(_)));
    }

    #[test]
    fn build_rejects_empty_document() {
        let document = doc(&[]);
        let err = ActionManifest::build(&document, &PathBuf::from("/actions")).unwrap_err();
        assert!(matches!(err, RundagError::EmptyManifest));
    }

    #[test]
    fn build_rejects_cycles() {
        let document = doc(&[("a", &["b"]), ("b", &["a"])]);
        let err = ActionManifest::build(&document, &PathBuf::from("/actions")).unwrap_err();
        assert!(matches!(err, RundagError::ManifestCycle(_)));
    }
}
