//! Bounded external command execution.
//!
//! [`run_command`] spawns `program args...` directly (no `sh -c`), so nothing in
//! an argument is ever interpreted by a shell. Stdout and stderr are drained
//! concurrently and capped; the whole run is wrapped in `tokio::time::timeout`.
//! On timeout the child is killed (`kill_on_drop`) and whatever stdout was
//! captured so far is handed back inside the error.

use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// Max bytes kept per stream. Output beyond this is drained and discarded.
const MAX_CAPTURE: usize = 1024 * 1024;

/// Output of a command that ran to completion (successfully or not).
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human-readable reason for a non-zero exit.
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started (not found, permission denied).
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },
    /// The process started but waiting on it failed.
    #[error("process error: {0}")]
    ProcessFailed(String),
    /// The command exceeded its budget and was killed.
    #[error("command timed out after {after:?}")]
    Timeout { after: Duration, partial_stdout: String },
}

/// Run `program` with `args` in `cwd` (or the current directory) and wait at
/// most `timeout` for it to finish.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, CommandError> {
    let start = Instant::now();
    debug!(program, ?args, ?cwd, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd.spawn().map_err(|e| CommandError::SpawnFailed {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| CommandError::ProcessFailed("failed to take stdout pipe".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| CommandError::ProcessFailed("failed to take stderr pipe".into()))?;

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let outcome = tokio::time::timeout(timeout, async {
        let (stdout_total, stderr_total) = tokio::join!(
            read_capped(&mut stdout, &mut stdout_buf),
            read_capped(&mut stderr, &mut stderr_buf),
        );
        let status = child.wait().await;
        (stdout_total, stderr_total, status)
    })
    .await;

    let Ok((stdout_total, stderr_total, status)) = outcome else {
        let _ = child.start_kill();
        return Err(CommandError::Timeout {
            after: timeout,
            partial_stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        });
    };
    let status = status.map_err(|e| CommandError::ProcessFailed(e.to_string()))?;

    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = start.elapsed().as_millis() as u64;

    Ok(CommandOutput {
        code: status.code(),
        stdout: finish_capture(&stdout_buf, stdout_total),
        stderr: finish_capture(&stderr_buf, stderr_total),
        duration_ms,
    })
}

/// Read to EOF into `buf`, keeping at most [`MAX_CAPTURE`] bytes. Keeps reading
/// past the cap so the child never blocks on a full pipe. Returns total bytes
/// seen.
async fn read_capped(reader: &mut (impl tokio::io::AsyncRead + Unpin), buf: &mut Vec<u8>) -> usize {
    let mut tmp = [0u8; 8192];
    let mut total = 0usize;
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                if buf.len() < MAX_CAPTURE {
                    let take = n.min(MAX_CAPTURE - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
            }
        }
    }
    total
}

fn finish_capture(buf: &[u8], total: usize) -> String {
    let mut s = String::from_utf8_lossy(buf).into_owned();
    if total > buf.len() {
        let _ = write!(
            s,
            "\n[truncated: {total} bytes total, showing first {}]",
            buf.len()
        );
    }
    s
}
