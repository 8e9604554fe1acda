//! Safe subprocess execution with timeout and kill escalation.
//!
//! ## Termination escalation
//! ```text
//! timeout elapses
//!   ├─► SIGTERM to the child's process group (unix; SIGKILL elsewhere)
//!   ├─► wait up to kill_timeout
//!   └─► SIGKILL to the group, wait again
//! ```
//! The child is spawned as its own process-group leader, so the signals
//! reach any helpers it forked; those descendants hold the write ends of
//! the stdout/stderr pipes, and leaving them alive would both leak them
//! and block the pipe drain past the escalation window. `kill_on_drop`
//! backs all of this: even a panic between these steps cannot leak the
//! direct child.
//!
//! ## Registry
//! Every invocation registers its child's pid for the duration of the call.
//! [`SafeProcessRunner::shutdown`] cancels a shared token; in-flight
//! invocations observe it, kill their own child, and deregister, so the
//! registry drains to empty on shutdown.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::events::{Bus, Event, EventKind};
use crate::process::paths::validate_path;

/// Timeouts governing one subprocess invocation.
#[derive(Clone, Copy, Debug)]
pub struct ProcessConfig {
    /// Maximum wall time for the process to complete.
    pub timeout: Duration,
    /// Grace window after the termination signal before the force-kill.
    pub kill_timeout: Duration,
}

impl Default for ProcessConfig {
    /// `timeout = 60s`, `kill_timeout = 5s`.
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            kill_timeout: Duration::from_secs(5),
        }
    }
}

/// Captured output of a completed subprocess (exit code 0).
#[derive(Clone, Debug)]
pub struct ProcessOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr (warnings may land here even on success).
    pub stderr: String,
}

/// Executes external commands with validated arguments, a timeout, and
/// escalating termination.
///
/// One runner is shared engine-wide; its registry of live pids is what an
/// application-level shutdown uses to guarantee no subprocess outlives the
/// engine.
pub struct SafeProcessRunner {
    cfg: ProcessConfig,
    bus: Bus,
    shutdown: CancellationToken,
    active: Mutex<HashSet<u32>>,
}

impl SafeProcessRunner {
    /// Creates a runner publishing kill events on `bus`.
    pub fn new(cfg: ProcessConfig, bus: Bus) -> Self {
        Self {
            cfg,
            bus,
            shutdown: CancellationToken::new(),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Number of subprocesses currently running.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Requests termination of every outstanding subprocess. In-flight
    /// invocations kill their child and return [`UploadError::Canceled`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs `program` with `args` under the runner's default timeouts.
    pub async fn execute(
        &self,
        program: &Path,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<ProcessOutput, UploadError> {
        self.execute_with(program, args, cwd, self.cfg.timeout, self.cfg.kill_timeout)
            .await
    }

    /// Runs `program` with explicit timeouts.
    ///
    /// The program path and working directory are validated before launch;
    /// exit code 0 is the only success signal.
    pub async fn execute_with(
        &self,
        program: &Path,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Duration,
        kill_timeout: Duration,
    ) -> Result<ProcessOutput, UploadError> {
        let program = validate_path(program)?;
        if let Some(dir) = cwd {
            validate_path(dir)?;
        }

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so termination signals reach descendants too.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| UploadError::ProcessLaunchFailed {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(pid);
        }

        let result = self
            .supervise(&mut child, &program, timeout, kill_timeout)
            .await;

        if let Some(pid) = pid {
            self.active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&pid);
        }
        result
    }

    /// Waits for the child while draining its pipes, applying timeout and
    /// shutdown handling.
    async fn supervise(
        &self,
        child: &mut Child,
        program: &Path,
        timeout: Duration,
        kill_timeout: Duration,
    ) -> Result<ProcessOutput, UploadError> {
        let stdout = spawn_drain(child.stdout.take());
        let stderr = spawn_drain(child.stderr.take());

        enum Wait {
            Done(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Shutdown,
        }

        let outcome = select! {
            status = child.wait() => Wait::Done(status),
            _ = time::sleep(timeout) => Wait::TimedOut,
            _ = self.shutdown.cancelled() => Wait::Shutdown,
        };

        let status = match outcome {
            Wait::Done(status) => status,
            Wait::TimedOut => {
                self.terminate(child, program, kill_timeout, "timeout").await;
                // Bounded: a straggler that survived the group SIGKILL must
                // not pin this worker on its pipe forever.
                let _ = time::timeout(kill_timeout, stdout).await;
                let _ = time::timeout(kill_timeout, stderr).await;
                return Err(UploadError::ProcessTimeout { timeout });
            }
            Wait::Shutdown => {
                self.terminate(child, program, kill_timeout, "shutdown").await;
                let _ = time::timeout(kill_timeout, stdout).await;
                let _ = time::timeout(kill_timeout, stderr).await;
                return Err(UploadError::Canceled);
            }
        };

        let status = status.map_err(|e| UploadError::ProcessLaunchFailed {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;
        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();

        match status.code() {
            Some(0) => Ok(ProcessOutput { stdout, stderr }),
            code => Err(UploadError::ProcessNonZeroExit {
                code: code.unwrap_or(-1),
                stderr: stderr.trim().chars().take(500).collect(),
            }),
        }
    }

    /// Graceful signal, grace window, then force-kill.
    async fn terminate(&self, child: &mut Child, program: &Path, grace: Duration, why: &str) {
        tracing::warn!(program = %program.display(), why, "terminating subprocess");
        self.bus.publish(
            Event::now(EventKind::ProcessKilled)
                .with_error(format!("{}: {}", program.display(), why)),
        );

        signal_term(child);
        if time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }

        signal_kill(child);
        if time::timeout(grace, child.wait()).await.is_err() {
            // kill_on_drop reaps it once the handle is dropped.
            tracing::error!(program = %program.display(), "subprocess survived SIGKILL wait");
        }
    }
}

/// Reads a pipe to completion on its own task so the child never blocks on
/// a full pipe while we wait on it.
fn spawn_drain<R>(stream: Option<R>) -> JoinHandle<String>
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stream) = stream {
            let _ = stream.read_to_string(&mut buf).await;
        }
        buf
    })
}

#[cfg(unix)]
fn signal_term(child: &Child) {
    // SIGTERM first so archivers can flush partial volumes.
    signal_group(child, libc::SIGTERM);
}

#[cfg(unix)]
fn signal_kill(child: &mut Child) {
    signal_group(child, libc::SIGKILL);
    let _ = child.start_kill();
}

/// Signals the child's whole process group; the child is its own group
/// leader, so the negative pid reaches every descendant as well.
#[cfg(unix)]
fn signal_group(child: &Child, signal: libc::c_int) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_term(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn signal_kill(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn runner() -> SafeProcessRunner {
        SafeProcessRunner::new(ProcessConfig::default(), Bus::new(64))
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let out = runner()
            .execute(&PathBuf::from("/bin/sh"), &["-c", "echo packaged"], None)
            .await
            .unwrap();
        assert!(out.stdout.contains("packaged"));
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let err = runner()
            .execute(
                &PathBuf::from("/bin/sh"),
                &["-c", "echo corrupt archive >&2; exit 3"],
                None,
            )
            .await
            .unwrap_err();
        match err {
            UploadError::ProcessNonZeroExit { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("corrupt archive"));
            }
            other => panic!("expected ProcessNonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_executable_is_launch_failure() {
        let err = runner()
            .execute(&PathBuf::from("/no/such/archiver"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::ProcessLaunchFailed { .. }));
    }

    #[tokio::test]
    async fn invalid_program_path_is_rejected_before_launch() {
        let err = runner()
            .execute(&PathBuf::from("../bin/rar"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PathValidation { .. }));
    }

    #[tokio::test]
    async fn never_exiting_process_is_killed_within_escalation_window() {
        let r = runner();
        let started = Instant::now();
        let err = r
            .execute_with(
                &PathBuf::from("/bin/sh"),
                &["-c", "sleep 600"],
                None,
                Duration::from_millis(200),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ProcessTimeout { .. }));
        // timeout + at most two grace windows, with scheduling slack.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.active_count(), 0);
    }

    #[tokio::test]
    async fn kill_escalation_reaps_the_whole_process_tree() {
        let r = runner();
        let started = Instant::now();
        // The shell forks a background helper that inherits the stdout
        // pipe; only a group-wide kill takes both down.
        let err = r
            .execute_with(
                &PathBuf::from("/bin/sh"),
                &["-c", "sleep 600 & sleep 600"],
                None,
                Duration::from_millis(200),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ProcessTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_terminates_outstanding_children() {
        let r = std::sync::Arc::new(runner());
        let r2 = r.clone();
        let handle = tokio::spawn(async move {
            r2.execute_with(
                &PathBuf::from("/bin/sh"),
                &["-c", "sleep 600"],
                None,
                Duration::from_secs(600),
                Duration::from_millis(500),
            )
            .await
        });

        // Let the child start, then pull the plug.
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(r.active_count(), 1);
        r.shutdown();

        let res = handle.await.unwrap();
        assert!(matches!(res, Err(UploadError::Canceled)));
        assert_eq!(r.active_count(), 0);
    }
}
