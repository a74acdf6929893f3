// src/exec/process.rs

//! Child process plumbing for one task subprocess.
//!
//! Each task runs the launcher under the action runtime binary, in its own
//! process group, with both standard streams piped. The launcher protocol:
//! the child writes a single NUL byte on stdout once its runtime is
//! initialized, reads one JSON line from stdin, writes its JSON result on
//! stdout and exits.
//!
//! Suspend/continue is delivered as `SIGSTOP`/`SIGCONT` to the child's
//! process group so a paused child consumes no CPU while waiting its turn.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Interval between `try_wait` checks while reaping an exited child.
const REAP_POLL: Duration = Duration::from_millis(5);

/// How a task subprocess is launched: `<bin> <launcher> <task key>`.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub bin: PathBuf,
    pub launcher: PathBuf,
    pub action_root: PathBuf,
}

/// One live task subprocess with its two pipe endpoints.
///
/// Both pipe ends are owned `Option`s so each is closed exactly once, and
/// `Drop` force-terminates the process group if the child is still alive.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    pgid: Pid,
    reaped: bool,
}

impl ChildProcess {
    /// Fork the task subprocess: piped stdin/stdout, a fresh process group,
    /// the exported environment snapshot, and the task key as the launcher
    /// argument. Exec failure surfaces here, before the FSM proceeds.
    pub fn spawn(
        spec: &SpawnSpec,
        key: &str,
        env: &[(OsString, OsString)],
    ) -> io::Result<Self> {
        let mut child = Command::new(&spec.bin)
            .arg(&spec.launcher)
            .arg(key)
            .current_dir(&spec.action_root)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .process_group(0)
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let pgid = Pid::from_raw(child.id() as i32);

        debug!(task = %key, pid = child.id(), "spawned task subprocess");

        Ok(Self {
            child,
            stdin,
            stdout,
            pgid,
            reaped: false,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Block until the child writes its single readiness byte, bounded by
    /// `deadline`. A child that exits first yields `UnexpectedEof`; a child
    /// that stays silent yields `TimedOut`.
    pub fn await_ready(&mut self, deadline: Instant) -> io::Result<()> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "child did not signal readiness before the deadline",
                ));
            }
            if self.poll_readable(remaining)? {
                break;
            }
        }

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| io::Error::other("output pipe already closed"))?;
        let mut byte = [0u8; 1];
        loop {
            match stdout.read(&mut byte) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "child exited before signalling readiness",
                    ));
                }
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop the child's process group. A group that no longer exists means
    /// the child already exited; its output is still in the pipe, so that is
    /// not an error here.
    pub fn suspend(&self) -> io::Result<()> {
        match killpg(self.pgid, Signal::SIGSTOP) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    /// Continue the child's process group.
    pub fn resume(&self) -> io::Result<()> {
        match killpg(self.pgid, Signal::SIGCONT) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    /// Write one serialized input line to the child's stdin.
    pub fn write_input(&mut self, input: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("input pipe already closed"))?;
        stdin.write_all(input.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    /// Bounded readability poll on the output pipe. Never blocks past
    /// `timeout`; `EINTR` is retried transparently.
    fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        let stdout = self
            .stdout
            .as_ref()
            .ok_or_else(|| io::Error::other("output pipe already closed"))?;
        let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
        loop {
            let mut fds = [PollFd::new(
                stdout.as_fd(),
                PollFlags::POLLIN | PollFlags::POLLHUP,
            )];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    /// Drain whatever output arrives within `window` into `buf`, never
    /// blocking past it. Returns `true` once end-of-stream is reached, at
    /// which point the pipe is closed; `false` means the child still holds
    /// its write end and the caller must come back for another window.
    pub fn drain_output(&mut self, window: Duration, buf: &mut Vec<u8>) -> io::Result<bool> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.poll_readable(remaining)? {
                return Ok(false);
            }
            let stdout = self
                .stdout
                .as_mut()
                .ok_or_else(|| io::Error::other("output pipe already closed"))?;
            let mut chunk = [0u8; 4096];
            match stdout.read(&mut chunk) {
                Ok(0) => {
                    self.stdout.take();
                    return Ok(true);
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reap the child, bounded by `deadline`. A child that closed its output
    /// but keeps running yields `TimedOut` instead of blocking the driver.
    pub fn wait_exit(&mut self, deadline: Instant) -> io::Result<ExitStatus> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "child did not exit after closing its output",
                ));
            }
            std::thread::sleep(REAP_POLL);
        }
    }

    /// Force-terminate the process group and reap. Idempotent; also closes
    /// any pipe endpoint still open.
    pub fn terminate(&mut self) {
        self.stdin.take();
        self.stdout.take();
        if self.reaped {
            return;
        }
        if let Err(e) = killpg(self.pgid, Signal::SIGKILL) {
            // ESRCH just means the group is already gone.
            if e != Errno::ESRCH {
                warn!(pid = self.child.id(), error = %e, "failed to kill process group");
            }
        }
        // Wake any stopped descendants so the whole group exits promptly.
        let _ = killpg(self.pgid, Signal::SIGCONT);
        match self.child.wait() {
            Ok(_) => {}
            Err(e) => warn!(pid = self.child.id(), error = %e, "failed to reap child"),
        }
        self.reaped = true;
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
