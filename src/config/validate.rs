// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ManifestDocument;
use crate::errors::{Result, RundagError};

/// Validate a manifest document before graph construction.
///
/// Checks, in order:
/// - the document declares at least one task,
/// - every dependency key resolves to a declared task,
/// - no task depends on itself,
/// - the dependency graph is acyclic.
///
/// All of these are fatal input errors surfaced before any subprocess is
/// spawned.
pub fn validate_document(doc: &ManifestDocument) -> Result<()> {
    ensure_has_tasks(doc)?;
    validate_dependencies(doc)?;
    validate_acyclic(doc)?;
    Ok(())
}

fn ensure_has_tasks(doc: &ManifestDocument) -> Result<()> {
    if doc.tasks.is_empty() {
        return Err(RundagError::EmptyManifest);
    }
    Ok(())
}

fn validate_dependencies(doc: &ManifestDocument) -> Result<()> {
    for (name, task) in doc.tasks.iter() {
        for dep in task.depends.iter() {
            if !doc.tasks.contains_key(dep) {
                return Err(RundagError::MalformedManifest(format!(
                    "task '{name}' declares unknown dependency '{dep}'"
                )));
            }
            if dep == name {
                return Err(RundagError::MalformedManifest(format!(
                    "task '{name}' cannot depend on itself"
                )));
            }
        }
    }
    Ok(())
}

fn validate_acyclic(doc: &ManifestDocument) -> Result<()> {
    // Edge direction: dep -> task. For
    //   "b": { "depends": ["a"] }
    // we add edge a -> b.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in doc.tasks.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in doc.tasks.iter() {
        for dep in task.depends.iter() {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    // A topological sort fails iff there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(RundagError::ManifestCycle(format!(
                "cycle detected in the dependency graph involving task '{node}'"
            )))
        }
    }
}
