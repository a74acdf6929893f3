#![allow(dead_code)]

//! Fake runtime launchers for end-to-end tests.
//!
//! Each helper writes a `/bin/sh` script speaking the runtime protocol: emit
//! one NUL ready byte on stdout, read one JSON input line on stdin, write the
//! result on stdout and exit. The task key arrives as `$1`, exactly as the
//! real launcher receives it.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write a launcher script that runs `body` after the ready handshake.
pub fn write_launcher(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\nprintf '\\0'\n{body}\n"))
        .expect("Failed to write launcher script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("Failed to chmod launcher script");
    path
}

/// Launcher that echoes its input line back as the result.
pub fn echo_launcher(dir: &Path) -> PathBuf {
    write_launcher(dir, "echo.sh", "IFS= read -r line\nprintf '%s' \"$line\"")
}

/// Launcher whose result records both the task key and the input it was fed,
/// so tests can assert exactly what each task received.
pub fn recording_launcher(dir: &Path) -> PathBuf {
    write_launcher(
        dir,
        "record.sh",
        "IFS= read -r line\nprintf '{\"task\":\"%s\",\"input\":%s}' \"$1\" \"$line\"",
    )
}

/// Launcher that acknowledges readiness, consumes its input, then blocks
/// forever waiting for a second line that never comes.
pub fn hanging_launcher(dir: &Path) -> PathBuf {
    write_launcher(dir, "hang.sh", "IFS= read -r line\nIFS= read -r never")
}

/// Launcher that reports an application-level error object.
pub fn failing_launcher(dir: &Path) -> PathBuf {
    write_launcher(
        dir,
        "fail.sh",
        "IFS= read -r line\nprintf '{\"error\":\"task %s failed\"}' \"$1\"",
    )
}
