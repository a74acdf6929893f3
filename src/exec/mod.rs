// src/exec/mod.rs

//! Task execution: subprocess plumbing and the per-task state machine.

pub mod controller;
pub mod process;

pub use controller::{Step, TaskController, TaskState};
pub use process::{ChildProcess, SpawnSpec};
