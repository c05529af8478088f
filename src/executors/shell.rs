// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Shell executor
//!
//! Executes step commands through a shell. Each step runs in its own process
//! group, and the whole group is killed once the shell exits or the step's
//! future is dropped, so nothing a step starts outlives it.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{ExecutionResult, Executor, StepInvocation};
use crate::errors::ShipflowError;
use crate::pipeline::MAX_CAPTURED_OUTPUT;

/// Bytes kept per stream. Twice the reported tail, so a secret split at the
/// front of the buffer is cut away before the report is written.
const CAPTURE_LIMIT: usize = 2 * MAX_CAPTURED_OUTPUT;

const READ_CHUNK: usize = 8 * 1024;

/// Shell executor
pub struct ShellExecutor;

impl ShellExecutor {
    /// Create a new shell executor
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments placed before the command for a given shell
fn shell_args(shell: &str) -> &'static [&'static str] {
    let name = Path::new(shell)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(shell);

    match name {
        "bash" => &["--noprofile", "--norc", "-eo", "pipefail", "-c"],
        "sh" | "dash" | "zsh" => &["-e", "-c"],
        "pwsh" | "powershell" => &["-NoProfile", "-NonInteractive", "-Command"],
        "cmd" => &["/D", "/C"],
        _ => &["-c"],
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<ExecutionResult, ShipflowError> {
        let start = Instant::now();

        let mut cmd = Command::new(invocation.shell);
        cmd.args(shell_args(invocation.shell)).arg(&invocation.command);
        cmd.current_dir(&invocation.working_dir);
        cmd.envs(&invocation.env);
        for (name, value) in &invocation.secret_env {
            cmd.env(name, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let step_error = |what: &str, e: std::io::Error| ShipflowError::StepExecution {
            step: invocation.step.to_string(),
            exit_code: None,
            output: format!("failed to {} '{}': {}", what, invocation.shell, e),
        };

        let mut child = cmd.spawn().map_err(|e| step_error("start", e))?;
        let mut group = ProcessGroup::of(&child);
        let stdout = child.stdout.take().map(|out| tokio::spawn(capture(out, CAPTURE_LIMIT)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(capture(err, CAPTURE_LIMIT)));

        let status = child.wait().await.map_err(|e| step_error("wait for", e))?;
        // Leftover background jobs would keep the pipes open.
        group.kill();

        let duration = start.elapsed();
        tracing::debug!(step = invocation.step, status = %status, duration_ms = duration.as_millis() as u64, "Shell exited");

        Ok(ExecutionResult {
            success: status.success(),
            stdout: collect(stdout).await,
            stderr: collect(stderr).await,
            exit_code: status.code(),
            duration,
        })
    }

    async fn check_available(&self, shell: &str) -> bool {
        which::which(shell).is_ok()
    }
}

/// A step's process group, killed on drop
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { id: child.id() }
    }

    fn kill(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(id as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid = id, error = %e, "Failed to kill step process group"),
            }
        }

        #[cfg(not(unix))]
        tracing::trace!(pid = id, "Process groups unsupported; relying on kill_on_drop");
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// The last `limit` bytes of a stream
#[derive(Debug)]
struct TailBuffer {
    bytes: VecDeque<u8>,
    limit: usize,
    dropped: usize,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(limit.min(READ_CHUNK)),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let chunk = if chunk.len() > self.limit {
            self.dropped += chunk.len() - self.limit;
            &chunk[chunk.len() - self.limit..]
        } else {
            chunk
        };

        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.limit);
        self.bytes.drain(..overflow);
        self.dropped += overflow;
        self.bytes.extend(chunk);
    }

    fn into_string(self) -> String {
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, "Step output exceeded the capture buffer");
        }
        let bytes: Vec<u8> = self.bytes.into_iter().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> TailBuffer {
    let mut buffer = TailBuffer::new(limit);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading step output");
                break;
            }
        }
    }
    buffer
}

async fn collect(task: Option<JoinHandle<TailBuffer>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match task.await {
        Ok(buffer) => buffer.into_string(),
        Err(e) => {
            tracing::debug!(error = %e, "Output reader did not finish");
            String::new()
        }
    }
}
