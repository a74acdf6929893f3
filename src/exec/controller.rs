// src/exec/controller.rs

//! Per-task lifecycle state machine.
//!
//! One `TaskController` owns one subprocess from spawn to reap and walks it
//! through a fixed state sequence, one transition per [`TaskController::advance`]
//! call. The only state that may report no progress is `AwaitingOutput`: the
//! child has not produced its result within the granted time slice. Holding a
//! controller at `Paused` until its dependencies are computed is the dispatch
//! loop's job, not the state machine's.

use std::ffi::OsString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::dag::Relation;
use crate::errors::{Result, RundagError};
use crate::exec::process::{ChildProcess, SpawnSpec};
use crate::sched::{RoundRobin, SchedulerHandle};

/// How long a child may keep running after closing its output pipe before
/// it is force-terminated. The result is already stored by then.
const EXIT_GRACE: Duration = Duration::from_millis(100);

/// Lifecycle states, in transition order. `Failed` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Spawned,
    Ready,
    Paused,
    Resumed,
    InputSent,
    AwaitingOutput,
    OutputRead,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// Outcome of one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The state machine moved one state forward.
    Transitioned,
    /// No transition was possible yet; try again later.
    Pending,
    /// The invocation was cancelled; the controller is now `Failed`.
    Cancelled,
}

/// Drives one subprocess through its lifecycle.
pub struct TaskController {
    relation: Arc<Relation>,
    spawn: SpawnSpec,
    env: Arc<Vec<(OsString, OsString)>>,
    payload: Arc<String>,
    scheduler: Arc<RoundRobin>,
    handle: Arc<SchedulerHandle>,
    cancel: Arc<AtomicBool>,
    timeout: Duration,
    deadline: Instant,
    child: Option<ChildProcess>,
    output: Vec<u8>,
    state: TaskState,
}

impl TaskController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relation: Arc<Relation>,
        spawn: SpawnSpec,
        env: Arc<Vec<(OsString, OsString)>>,
        payload: Arc<String>,
        scheduler: Arc<RoundRobin>,
        handle: Arc<SchedulerHandle>,
        cancel: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Self {
        Self {
            relation,
            spawn,
            env,
            payload,
            scheduler,
            handle,
            cancel,
            timeout,
            deadline: Instant::now() + timeout,
            child: None,
            output: Vec::new(),
            state: TaskState::Init,
        }
    }

    pub fn key(&self) -> &str {
        self.relation.key()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Done
    }

    /// Perform at most one state transition.
    ///
    /// Any error force-terminates the subprocess and leaves the controller
    /// `Failed` before the error propagates; sibling tasks are untouched.
    pub fn advance(&mut self) -> Result<Step> {
        if self.state.is_terminal() {
            return Ok(Step::Pending);
        }
        if self.cancel.load(Ordering::Acquire) {
            self.abort();
            return Ok(Step::Cancelled);
        }
        match self.step() {
            Ok(step) => Ok(step),
            Err(e) => {
                warn!(task = %self.key(), error = %e, "task failed");
                self.fail();
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<Step> {
        match self.state {
            TaskState::Init => {
                let child = ChildProcess::spawn(&self.spawn, self.relation.key(), &self.env)
                    .map_err(|e| RundagError::subprocess(self.key(), e))?;
                self.child = Some(child);
                // The deadline bounds the ready handshake; it is re-armed at
                // dispatch so long-idle dependents are not penalized.
                self.deadline = Instant::now() + self.timeout;
                self.state = TaskState::Spawned;
            }
            TaskState::Spawned => {
                let deadline = self.deadline;
                self.child_mut()?
                    .await_ready(deadline)
                    .map_err(|e| self.classify(e))?;
                self.state = TaskState::Ready;
            }
            TaskState::Ready => {
                self.child_ref()?
                    .suspend()
                    .map_err(|e| RundagError::subprocess(self.relation.key(), e))?;
                self.state = TaskState::Paused;
            }
            TaskState::Paused => {
                // The dispatch loop only opens this controller's gate once
                // every dependency value is set.
                debug_assert!(
                    self.relation.dependencies().iter().all(|d| d.is_computed()),
                    "task dispatched before its dependencies completed"
                );
                self.child_ref()?
                    .resume()
                    .map_err(|e| RundagError::subprocess(self.relation.key(), e))?;
                self.deadline = Instant::now() + self.timeout;
                self.state = TaskState::Resumed;
            }
            TaskState::Resumed => {
                let input = self.compose_input()?;
                debug!(task = %self.key(), input = %input, "sending input");
                self.child_mut()?
                    .write_input(&input)
                    .map_err(|e| RundagError::subprocess(self.relation.key(), e))?;
                self.state = TaskState::InputSent;
            }
            TaskState::InputSent => {
                self.state = TaskState::AwaitingOutput;
            }
            TaskState::AwaitingOutput => return self.await_output(),
            TaskState::OutputRead => {
                // The result is already stored, so the reap is bounded by a
                // short grace window rather than the task deadline.
                match self.child_mut()?.wait_exit(Instant::now() + EXIT_GRACE) {
                    Ok(status) => {
                        if !status.success() {
                            warn!(task = %self.key(), %status, "task subprocess exited abnormally");
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        warn!(task = %self.key(), "subprocess lingered after closing its output");
                        if let Some(child) = self.child.as_mut() {
                            child.terminate();
                        }
                    }
                    Err(e) => return Err(RundagError::subprocess(self.relation.key(), e)),
                }
                self.handle.mark_finished();
                debug!(task = %self.key(), "task done");
                self.state = TaskState::Done;
            }
            TaskState::Done | TaskState::Failed => return Ok(Step::Pending),
        }
        Ok(Step::Transitioned)
    }

    /// One fair round of waiting for the child's result: take a time slice,
    /// let the child run, drain whatever output arrives within the slice,
    /// and suspend the child again if the stream is not yet closed.
    ///
    /// Each round reads at most one window's worth, so a child that writes a
    /// partial result and then stalls holds neither the slice baton nor this
    /// driver past the task deadline.
    fn await_output(&mut self) -> Result<Step> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RundagError::TaskTimeout {
                task: self.relation.key().to_string(),
            });
        }

        let Some(slice) = self.scheduler.request_slice(&self.handle) else {
            self.abort();
            return Ok(Step::Cancelled);
        };
        let window = slice.duration().min(remaining);

        self.child_ref()?
            .resume()
            .map_err(|e| RundagError::subprocess(self.relation.key(), e))?;

        let key = self.relation.key().to_string();
        let child = self.child.as_mut().ok_or_else(|| {
            RundagError::subprocess(key.clone(), std::io::Error::other("no child process"))
        })?;
        let eof = child
            .drain_output(window, &mut self.output)
            .map_err(|e| RundagError::subprocess(key, e))?;

        if !eof {
            self.child_ref()?
                .suspend()
                .map_err(|e| RundagError::subprocess(self.relation.key(), e))?;
            return Ok(Step::Pending);
        }

        let raw = String::from_utf8_lossy(&self.output).into_owned();
        let result = normalize_output(raw);
        debug!(task = %self.key(), result = %result, "output read");
        self.relation.set_value(result);
        self.state = TaskState::OutputRead;
        Ok(Step::Transitioned)
    }

    /// Compose the child's input line: the invocation payload verbatim for a
    /// task without dependencies, otherwise a JSON object keyed by dependency
    /// name holding each dependency's parsed result.
    fn compose_input(&self) -> Result<String> {
        let deps = self.relation.dependencies();
        if deps.is_empty() {
            return Ok(self.payload.as_str().to_string());
        }
        let mut object = serde_json::Map::with_capacity(deps.len());
        for dep in deps {
            let raw = dep.value_snapshot().ok_or_else(|| {
                anyhow::anyhow!(
                    "dependency '{}' of task '{}' has no value",
                    dep.key(),
                    self.relation.key()
                )
            })?;
            object.insert(dep.key().to_string(), serde_json::from_str(&raw)?);
        }
        Ok(serde_json::Value::Object(object).to_string())
    }

    /// Force-terminate the subprocess group and mark the task failed. The
    /// scheduler handle is marked finished so the queue never grants this
    /// task again.
    pub fn fail(&mut self) {
        if let Some(child) = self.child.as_mut() {
            child.terminate();
        }
        self.handle.mark_finished();
        self.state = TaskState::Failed;
    }

    /// Cancellation path: identical teardown, logged at debug.
    pub fn abort(&mut self) {
        debug!(task = %self.key(), "task aborted");
        self.fail();
    }

    fn classify(&self, e: std::io::Error) -> RundagError {
        if e.kind() == std::io::ErrorKind::TimedOut {
            RundagError::TaskTimeout {
                task: self.relation.key().to_string(),
            }
        } else {
            RundagError::subprocess(self.relation.key(), e)
        }
    }

    fn child_ref(&self) -> Result<&ChildProcess> {
        self.child.as_ref().ok_or_else(|| {
            RundagError::subprocess(
                self.relation.key(),
                std::io::Error::other("no child process"),
            )
        })
    }

    fn child_mut(&mut self) -> Result<&mut ChildProcess> {
        let key = self.relation.key().to_string();
        self.child.as_mut().ok_or_else(|| {
            RundagError::subprocess(key, std::io::Error::other("no child process"))
        })
    }
}

/// A child that produced nothing still completes its relation: the value slot
/// uses the empty-object marker.
fn normalize_output(raw: String) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "{}".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use super::*;
    use crate::sched::DEFAULT_BUDGET;

    fn write_launcher(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("launcher.sh");
        fs::write(&path, format!("#!/bin/sh\nprintf '\\0'\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn controller(
        dir: &std::path::Path,
        launcher: PathBuf,
        payload: &str,
        timeout: Duration,
    ) -> (TaskController, Arc<Relation>) {
        let relation = Arc::new(Relation::new(
            "t".into(),
            dir.join("t.sh"),
            vec![],
        ));
        let spawn = SpawnSpec {
            bin: PathBuf::from("/bin/sh"),
            launcher,
            action_root: dir.to_path_buf(),
        };
        let ctrl = TaskController::new(
            Arc::clone(&relation),
            spawn,
            Arc::new(Vec::new()),
            Arc::new(payload.to_string()),
            RoundRobin::new(DEFAULT_BUDGET),
            Arc::new(SchedulerHandle::new()),
            Arc::new(AtomicBool::new(false)),
            timeout,
        );
        (ctrl, relation)
    }

    fn drive_to_end(ctrl: &mut TaskController) -> Result<()> {
        for _ in 0..1_000 {
            if ctrl.is_terminal() {
                return Ok(());
            }
            ctrl.advance()?;
        }
        panic!("controller did not reach a terminal state");
    }

    #[test]
    fn echo_task_walks_the_full_state_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = write_launcher(dir.path(), "IFS= read -r line\nprintf '%s' \"$line\"");
        let (mut ctrl, relation) =
            controller(dir.path(), launcher, r#"{"n":1}"#, Duration::from_secs(10));

        let mut seen = vec![ctrl.state()];
        while !ctrl.is_terminal() {
            if ctrl.advance().unwrap() == Step::Transitioned {
                seen.push(ctrl.state());
            }
        }

        assert_eq!(
            seen,
            vec![
                TaskState::Init,
                TaskState::Spawned,
                TaskState::Ready,
                TaskState::Paused,
                TaskState::Resumed,
                TaskState::InputSent,
                TaskState::AwaitingOutput,
                TaskState::OutputRead,
                TaskState::Done,
            ]
        );
        assert!(ctrl.succeeded());
        assert!(ctrl.handle.is_finished());
        assert_eq!(relation.value_snapshot().as_deref(), Some(r#"{"n":1}"#));
    }

    #[test]
    fn hung_child_times_out_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        // Reads a second line that never comes.
        let launcher = write_launcher(
            dir.path(),
            "IFS= read -r line\nIFS= read -r never",
        );
        let (mut ctrl, relation) =
            controller(dir.path(), launcher, "{}", Duration::from_millis(300));

        let started = Instant::now();
        let err = drive_to_end(&mut ctrl).unwrap_err();
        assert!(matches!(err, RundagError::TaskTimeout { .. }));
        assert_eq!(ctrl.state(), TaskState::Failed);
        assert!(ctrl.handle.is_finished());
        assert!(!relation.is_computed());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn partial_output_then_stall_times_out() {
        let dir = tempfile::tempdir().unwrap();
        // Writes an unterminated fragment, then blocks without closing stdout.
        let launcher = write_launcher(
            dir.path(),
            "IFS= read -r line\nprintf '{\"partial\":true'\nIFS= read -r never",
        );
        let (mut ctrl, relation) =
            controller(dir.path(), launcher, "{}", Duration::from_millis(300));

        let started = Instant::now();
        let err = drive_to_end(&mut ctrl).unwrap_err();
        assert!(matches!(err, RundagError::TaskTimeout { .. }));
        assert_eq!(ctrl.state(), TaskState::Failed);
        assert!(!relation.is_computed());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn child_lingering_after_its_output_is_reaped_within_the_grace_window() {
        let dir = tempfile::tempdir().unwrap();
        // Closes stdout after the full result but never exits on its own.
        let launcher = write_launcher(
            dir.path(),
            "IFS= read -r line\nprintf '{\"ok\":true}'\nexec >&-\nIFS= read -r never",
        );
        let (mut ctrl, relation) =
            controller(dir.path(), launcher, "{}", Duration::from_secs(10));

        let started = Instant::now();
        drive_to_end(&mut ctrl).unwrap();
        assert!(ctrl.succeeded());
        assert_eq!(relation.value_snapshot().as_deref(), Some(r#"{"ok":true}"#));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn silent_child_completes_with_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = write_launcher(dir.path(), "IFS= read -r line");
        let (mut ctrl, relation) =
            controller(dir.path(), launcher, "{}", Duration::from_secs(10));

        drive_to_end(&mut ctrl).unwrap();
        assert!(ctrl.succeeded());
        assert_eq!(relation.value_snapshot().as_deref(), Some("{}"));
    }

    #[test]
    fn cancel_flag_aborts_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = write_launcher(dir.path(), "IFS= read -r line");
        let (mut ctrl, _relation) =
            controller(dir.path(), launcher, "{}", Duration::from_secs(10));
        ctrl.cancel.store(true, Ordering::Release);

        assert_eq!(ctrl.advance().unwrap(), Step::Cancelled);
        assert_eq!(ctrl.state(), TaskState::Failed);
    }

    #[test]
    fn missing_binary_fails_the_task_at_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = write_launcher(dir.path(), "IFS= read -r line");
        let (mut ctrl, _relation) =
            controller(dir.path(), launcher, "{}", Duration::from_secs(10));
        ctrl.spawn.bin = PathBuf::from("/nonexistent/interpreter");

        let err = ctrl.advance().unwrap_err();
        assert!(matches!(err, RundagError::Subprocess { .. }));
        assert_eq!(ctrl.state(), TaskState::Failed);
    }
}
