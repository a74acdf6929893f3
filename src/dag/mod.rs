// src/dag/mod.rs

//! The action dependency graph.
//!
//! - [`relation`] holds one graph node: a task key, its artifact path, shared
//!   references to its dependencies and its lock-guarded result value.
//! - [`manifest`] owns the full node sequence and implements the
//!   dependency-respecting "next runnable task" selector used by the
//!   dispatch loop.

pub mod manifest;
pub mod relation;

pub use manifest::ActionManifest;
pub use relation::Relation;
