// src/engine/context.rs

//! One end-to-end invocation's orchestration unit.
//!
//! An [`ExecutionContext`] owns the action manifest, one dispatch gate per
//! relation and the completion barrier. [`ExecutionContext::run`] spawns one
//! driver thread per relation to walk that relation's controller through its
//! state machine, while the calling thread runs the dispatch loop: it picks
//! runnable relations with [`ActionManifest::next`], honors the manifest's
//! concurrency limit, and tears everything down on the first failure.

use std::ffi::OsString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::dag::ActionManifest;
use crate::engine::InvocationOutcome;
use crate::engine::gate::DispatchGate;
use crate::errors::Result;
use crate::exec::{SpawnSpec, Step, TaskController, TaskState};
use crate::sched::{RoundRobin, SchedulerHandle};

/// How long the dispatch loop parks between queue scans when no completion
/// event arrives. Relations become runnable when a dependency's value is set,
/// which happens one FSM step before the completion notification.
const DISPATCH_PARK: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct ProgressState {
    finished: usize,
    failure: Option<String>,
}

/// Completion barrier shared by the driver threads, the dispatch loop and
/// `wait_for_sync` callers. Records the first failure only.
#[derive(Debug, Default)]
struct Progress {
    state: Mutex<ProgressState>,
    cv: Condvar,
}

impl Progress {
    fn complete(&self, failure: Option<String>) {
        let mut state = self.lock();
        state.finished += 1;
        if state.failure.is_none() {
            state.failure = failure;
        }
        self.cv.notify_all();
    }

    fn finished(&self) -> usize {
        self.lock().finished
    }

    fn failed(&self) -> bool {
        self.lock().failure.is_some()
    }

    fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    fn wait_until_finished(&self, total: usize) {
        let mut state = self.lock();
        while state.finished < total {
            state = self.cv.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn wait_change(&self, timeout: Duration) {
        let state = self.lock();
        let _ = self
            .cv
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn notify(&self) {
        self.cv.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Orchestrates one invocation of one action.
pub struct ExecutionContext {
    manifest: ActionManifest,
    spawn: SpawnSpec,
    env: Arc<Vec<(OsString, OsString)>>,
    payload: Arc<String>,
    scheduler: Arc<RoundRobin>,
    task_timeout: Duration,
    /// Sibling invoker addresses for multi-node fan-out. Carried through for
    /// the response layer; the local engine never contacts them.
    peers: Vec<String>,
    gates: Vec<Arc<DispatchGate>>,
    /// One scheduler handle per relation, kept here so `abort` can mark them
    /// finished and unblock drivers waiting on a time slice.
    slice_handles: Vec<Arc<SchedulerHandle>>,
    progress: Arc<Progress>,
    cancel: Arc<AtomicBool>,
}

impl ExecutionContext {
    pub fn new(
        manifest: ActionManifest,
        spawn: SpawnSpec,
        env: Vec<(OsString, OsString)>,
        payload: String,
        scheduler: Arc<RoundRobin>,
        task_timeout: Duration,
    ) -> Self {
        let gates = manifest
            .relations()
            .map(|_| Arc::new(DispatchGate::new()))
            .collect();
        let slice_handles = manifest
            .relations()
            .map(|_| Arc::new(SchedulerHandle::new()))
            .collect();
        Self {
            manifest,
            spawn,
            env: Arc::new(env),
            payload: Arc::new(payload),
            scheduler,
            task_timeout,
            peers: Vec::new(),
            gates,
            slice_handles,
            progress: Arc::new(Progress::default()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Execute the invocation to completion. One-shot: relations' value slots
    /// are set-once, so a context runs exactly one invocation.
    pub fn run(&self) -> Result<InvocationOutcome> {
        info!(
            tasks = self.manifest.len(),
            concurrency = self.manifest.concurrency(),
            "starting invocation"
        );

        let mut drivers = Vec::with_capacity(self.manifest.len());
        for (idx, relation) in self.manifest.relations().enumerate() {
            let controller = TaskController::new(
                Arc::clone(relation),
                self.spawn.clone(),
                Arc::clone(&self.env),
                Arc::clone(&self.payload),
                Arc::clone(&self.scheduler),
                Arc::clone(&self.slice_handles[idx]),
                Arc::clone(&self.cancel),
                self.task_timeout,
            );
            let gate = Arc::clone(&self.gates[idx]);
            let progress = Arc::clone(&self.progress);
            let spawned = thread::Builder::new()
                .name(format!("task-{}", relation.key()))
                .spawn(move || drive(controller, gate, progress));
            match spawned {
                Ok(handle) => drivers.push(handle),
                Err(e) => {
                    self.abort();
                    for driver in drivers {
                        let _ = driver.join();
                    }
                    return Err(e.into());
                }
            }
        }

        self.dispatch();
        self.wait_for_sync();
        for driver in drivers {
            let _ = driver.join();
        }

        Ok(self.compose_outcome())
    }

    /// Dispatch loop: open gates for runnable relations, up to the
    /// concurrency limit, until every driver thread reported completion.
    fn dispatch(&self) {
        let total = self.manifest.len();
        let mut dispatched = vec![false; total];
        let mut dispatched_count = 0usize;
        let mut cursor = 0usize;
        let mut offset = 0usize;

        loop {
            if self.progress.failed() && !self.cancel.load(Ordering::Acquire) {
                self.abort();
            }
            let finished = self.progress.finished();
            if finished == total {
                return;
            }

            if !self.cancel.load(Ordering::Acquire) {
                let in_flight = dispatched_count.saturating_sub(finished);
                let mut slots = self.manifest.concurrency().saturating_sub(in_flight);
                // A full scan returning only already-dispatched relations
                // means nothing new is runnable right now.
                let mut misses = 0usize;
                while slots > 0 && misses < total {
                    let Some(anchor) = self.manifest.get(cursor) else {
                        break;
                    };
                    let key = anchor.key().to_string();
                    cursor = (cursor + 1) % total;
                    let Some(candidate) = self.manifest.next(&key, offset) else {
                        break;
                    };
                    offset = offset.wrapping_add(1);
                    let Some(idx) = self.manifest.index_of(candidate.key()) else {
                        break;
                    };
                    if dispatched[idx] {
                        misses += 1;
                        continue;
                    }
                    debug!(task = %candidate.key(), "dispatching task");
                    self.gates[idx].open();
                    dispatched[idx] = true;
                    dispatched_count += 1;
                    slots -= 1;
                    misses = 0;
                }
            }

            self.progress.wait_change(DISPATCH_PARK);
        }
    }

    /// Tear the invocation down: refuse new dispatches, wake paused drivers
    /// empty-handed, mark every scheduler handle finished so queued waiters
    /// are released without a grant. Idempotent, and scoped to this context:
    /// a shared scheduler keeps serving other invocations.
    pub fn abort(&self) {
        if self.cancel.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("aborting invocation");
        for gate in &self.gates {
            gate.cancel();
        }
        for handle in &self.slice_handles {
            handle.mark_finished();
        }
        self.progress.notify();
    }

    /// Block until every driver thread has finished.
    pub fn wait_for_sync(&self) {
        self.progress.wait_until_finished(self.manifest.len());
    }

    /// Wake `wait_for_sync` callers so they re-check completion.
    pub fn synchronize(&self) {
        self.progress.notify();
    }

    /// Whether every controller has reported `Done` or `Failed`.
    pub fn is_stopped(&self) -> bool {
        self.progress.finished() == self.manifest.len()
    }

    /// Compose the invocation result. A manifest-backed action yields a JSON
    /// object keyed by relation name; the single-task fallback yields the
    /// task's value directly. Failures always yield a synthetic error object
    /// rather than a hang.
    fn compose_outcome(&self) -> InvocationOutcome {
        if let Some(failure) = self.progress.failure() {
            return InvocationOutcome {
                ok: false,
                result: serde_json::json!({ "error": failure }),
            };
        }
        if !self.manifest.all_computed() {
            return InvocationOutcome {
                ok: false,
                result: serde_json::json!({ "error": "invocation aborted" }),
            };
        }

        if self.manifest.keyed() {
            let mut object = serde_json::Map::with_capacity(self.manifest.len());
            let mut ok = true;
            for relation in self.manifest.relations() {
                let value = parse_value(
                    relation
                        .value_snapshot()
                        .unwrap_or_else(|| "{}".to_string()),
                );
                ok &= !has_error_key(&value);
                object.insert(relation.key().to_string(), value);
            }
            InvocationOutcome {
                ok,
                result: Value::Object(object),
            }
        } else {
            let value = self
                .manifest
                .relations()
                .next()
                .and_then(|r| r.value_snapshot())
                .map(parse_value)
                .unwrap_or_else(|| serde_json::json!({}));
            InvocationOutcome {
                ok: !has_error_key(&value),
                result: value,
            }
        }
    }
}

/// Driver thread body: advance one controller until it is terminal, blocking
/// on the dispatch gate whenever the task is paused awaiting dispatch.
fn drive(mut controller: TaskController, gate: Arc<DispatchGate>, progress: Arc<Progress>) {
    let failure = loop {
        if controller.state() == TaskState::Paused && !gate.wait() {
            controller.abort();
            break Some(format!("task '{}' cancelled", controller.key()));
        }
        match controller.advance() {
            Ok(Step::Cancelled) => {
                break Some(format!("task '{}' cancelled", controller.key()));
            }
            Ok(_) => {
                if controller.is_terminal() {
                    break None;
                }
            }
            Err(e) => break Some(e.to_string()),
        }
    };
    progress.complete(failure);
}

/// A task result that is not valid JSON is carried as a bare string.
fn parse_value(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn has_error_key(value: &Value) -> bool {
    value.as_object().is_some_and(|o| o.contains_key("error"))
}
