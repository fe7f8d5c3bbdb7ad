//! Bounded command execution - one attempt under a timeout watchdog

use crate::core::output::Output;
use crate::execution::CancelToken;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Grace period between asking the process group to terminate and killing it
const KILL_GRACE: Duration = Duration::from_secs(2);

/// A command line to execute: an explicit argv, or a line for the shell
#[derive(Debug, Clone)]
pub enum CommandLine {
    Argv(Vec<String>),
    Shell(String),
}

impl CommandLine {
    fn to_command(&self, cwd: &Path) -> Command {
        let mut cmd = match self {
            CommandLine::Argv(argv) => {
                let mut cmd = Command::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
            CommandLine::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
        };
        cmd.current_dir(cwd);
        cmd
    }

    pub fn display(&self) -> String {
        match self {
            CommandLine::Argv(argv) => argv.join(" "),
            CommandLine::Shell(line) => line.clone(),
        }
    }
}

/// The command could not be started at all
///
/// Distinct from a failed attempt: a missing executable will not get better
/// with retries, so this is surfaced instead of consuming the budget.
#[derive(Debug, Error)]
#[error("failed to start '{command}': {source}")]
pub struct SpawnError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

/// Runs one external command to completion under a wall-clock timeout
///
/// On timeout the process group is asked to terminate, then killed if still
/// alive after a short grace period. The captured output up to that point is
/// returned with `timed_out` set; deciding what a timeout means is the
/// caller's job.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    mirror: bool,
    cancel: Arc<CancelToken>,
}

impl BoundedExecutor {
    pub fn new(cancel: Arc<CancelToken>) -> Self {
        Self {
            mirror: false,
            cancel,
        }
    }

    /// Mirror captured output lines to the operator's terminal in real time
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `command` in `cwd`, enforcing `timeout`
    pub async fn run(
        &self,
        command: &CommandLine,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<Output, SpawnError> {
        debug!(command = %command.display(), cwd = %cwd.display(), "spawning command");

        let mut cmd = command.to_command(cwd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| SpawnError {
            command: command.display(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = drain(stdout, self.mirror, false);
        let stderr_task = drain(stderr, self.mirror, true);

        let mut timed_out = false;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    command = %command.display(),
                    timeout_secs = timeout.as_secs(),
                    "command timed out, terminating process group"
                );
                timed_out = true;
                terminate(&mut child).await
            }
            _ = self.cancel.cancelled() => {
                warn!(command = %command.display(), "command cancelled, terminating process group");
                timed_out = true;
                terminate(&mut child).await
            }
        };

        let stdout = join_drain(stdout_task).await;
        let stderr = join_drain(stderr_task).await;

        let exit_code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(err = %e, "failed to collect exit status");
                None
            }
        };

        debug!(?exit_code, timed_out, "command finished");
        Ok(Output {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            structured: None,
            exit_code,
            timed_out,
        })
    }
}

/// Drain one output stream to a buffer, optionally mirroring lines live
fn drain(
    stream: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    mirror: bool,
    is_stderr: bool,
) -> Option<JoinHandle<Vec<u8>>> {
    let stream = stream?;
    Some(tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut collected = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if mirror {
                        if is_stderr {
                            let _ = tokio::io::stderr().write_all(&line).await;
                            let _ = tokio::io::stderr().flush().await;
                        } else {
                            let _ = tokio::io::stdout().write_all(&line).await;
                            let _ = tokio::io::stdout().flush().await;
                        }
                    }
                    collected.extend_from_slice(&line);
                }
            }
        }
        collected
    }))
}

async fn join_drain(task: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Ask the process group to terminate, then kill it if unresponsive
async fn terminate(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
        match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(status) => return status,
            Err(_) => signal_group(pid, libc::SIGKILL),
        }
    }

    let _ = child.kill().await;
    child.wait().await
}

/// Send a signal to the child's process group (the child is its own group
/// leader, so negative pid reaches the whole group)
#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: i32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), signal);
    }
}
