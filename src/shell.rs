//! Bounded shell command execution.
//!
//! Commands run through `sh -c` in a module's directory. The wait is
//! bounded: a command that outlives its timeout is left running (a reaper
//! thread keeps waiting on it) rather than killed, so long-running
//! background processes stay usable from action blocks.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// What happened to a shell command within its allotted wait.
#[derive(Debug)]
pub enum ShellOutcome {
    /// The command exited within the timeout.
    Completed {
        /// Exit code, `-1` when terminated by a signal.
        code: i32,
        /// Captured standard output, trailing newline stripped.
        stdout: String,
        /// Captured standard error, trailing newline stripped.
        stderr: String,
    },
    /// The command is still running after the timeout elapsed.
    TimedOut,
    /// A zero timeout requested fire-and-forget; nothing was awaited.
    Detached,
    /// The command could not be spawned at all.
    Failed(io::Error),
}

/// Run `command` in `working_directory`, waiting at most `timeout`.
///
/// A zero timeout means "do not wait at all": the process is spawned
/// detached with its output discarded.
#[must_use]
pub fn run_shell(command: &str, working_directory: &Path, timeout: Duration) -> ShellOutcome {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_directory)
        .stdin(Stdio::null());

    if timeout.is_zero() {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        return match cmd.spawn() {
            Ok(child) => {
                reap_in_background(child);
                ShellOutcome::Detached
            }
            Err(err) => ShellOutcome::Failed(err),
        };
    }

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => return ShellOutcome::Failed(err),
    };

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => ShellOutcome::Completed {
            code: output.status.code().unwrap_or(-1),
            stdout: capture(&output.stdout),
            stderr: capture(&output.stderr),
        },
        Ok(Err(err)) => ShellOutcome::Failed(err),
        // The reaper thread owns the child now; it finishes on its own time.
        Err(_) => ShellOutcome::TimedOut,
    }
}

fn reap_in_background(mut child: std::process::Child) {
    thread::spawn(move || {
        let _ = child.wait();
    });
}

fn capture(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\n')
        .to_string()
}
