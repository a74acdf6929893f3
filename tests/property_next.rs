//! Property tests for graph construction and the runnable-task selector.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use rundag::config::ManifestDocument;
use rundag::dag::ActionManifest;
use rundag_test_utils::builders::ManifestBuilder;

// Strategy to generate a valid DAG document.
// Acyclicity is guaranteed by only allowing task N to depend on tasks 0..N-1.
fn dag_document_strategy(max_tasks: usize) -> impl Strategy<Value = ManifestDocument> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        );

        deps_strat.prop_map(move |raw_deps| {
            let mut builder = ManifestBuilder::new();
            for (i, potential_deps) in raw_deps.into_iter().enumerate() {
                // Sanitize dependencies: only allow deps < i.
                let mut valid_deps = HashSet::new();
                for dep_idx in potential_deps {
                    if i > 0 {
                        valid_deps.insert(dep_idx % i);
                    }
                }
                let names: Vec<String> =
                    valid_deps.iter().map(|d| format!("task_{d}")).collect();
                let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                builder = builder.task(&format!("task_{i}"), &format!("task_{i}.sh"), &refs);
            }
            builder.build()
        })
    })
}

fn build(document: &ManifestDocument) -> ActionManifest {
    ActionManifest::build(document, Path::new("/actions")).expect("generated DAG is acyclic")
}

proptest! {
    #[test]
    fn build_produces_exactly_one_relation_per_task(document in dag_document_strategy(10)) {
        let manifest = build(&document);
        prop_assert_eq!(manifest.len(), document.tasks.len());
        for key in document.tasks.keys() {
            prop_assert_eq!(
                manifest.relations().filter(|r| r.key() == key).count(),
                1
            );
        }
        // Every dependency reference resolves within the same sequence.
        for relation in manifest.relations() {
            for dep in relation.dependencies() {
                prop_assert!(manifest.relations().any(|r| Arc::ptr_eq(r, dep)));
                prop_assert!(relation.depth() > dep.depth());
            }
        }
    }

    #[test]
    fn next_never_selects_a_relation_with_an_unready_dependency(
        document in dag_document_strategy(8),
        seed in any::<u64>(),
    ) {
        let manifest = build(&document);
        let total = manifest.len();

        // Simulate one full execution: each round asks `next` from a
        // seed-derived cursor and offset, completes the returned relation,
        // and checks it was actually runnable.
        for round in 0..total {
            let cursor = (seed.wrapping_mul(round as u64 + 1) % total as u64) as usize;
            let offset = seed.wrapping_add(round as u64) as usize;
            let key = manifest.get(cursor).expect("cursor in range").key().to_string();

            let selected = manifest.next(&key, offset).expect("work remains");
            prop_assert!(!selected.is_computed());
            prop_assert!(
                selected.dependencies().iter().all(|d| d.is_computed()),
                "selected task '{}' has an unready dependency",
                selected.key()
            );

            // Without mutation the selection is stable.
            let again = manifest.next(&key, offset).expect("work remains");
            prop_assert_eq!(again.key(), selected.key());

            selected.set_value("{}".to_string());
        }

        prop_assert!(manifest.all_computed());
        for relation in manifest.relations() {
            prop_assert!(manifest.next(relation.key(), seed as usize).is_none());
        }
    }
}
