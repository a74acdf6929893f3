// src/engine/mod.rs

//! Invocation orchestration: driver threads, dispatch loop, completion
//! barrier and result composition.

pub mod context;
pub mod gate;

pub use context::ExecutionContext;
pub use gate::DispatchGate;

/// Final result of one invocation.
///
/// `ok` is false when any task failed, the context was torn down, or a task's
/// result object carries an `"error"` key; `result` is still always a
/// complete JSON value, never a hang.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub ok: bool,
    pub result: serde_json::Value,
}
