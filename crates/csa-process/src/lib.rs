//! Process management for `exec.run`: spawning, timeout/cancellation
//! signal escalation, and output capture (spec.md §4.5, §5).
//!
//! Sandboxed execution (cgroups, rlimits) is explicitly out of scope;
//! the only isolation applied here is `setsid()` so a timeout or
//! cancellation can signal the whole process group, not just the leader.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::warn;

/// Controls whether stdout is forwarded to stderr in real-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Only buffer stdout; do not forward.
    BufferOnly,
    /// Buffer stdout AND forward each line to stderr with `[stdout] ` prefix (default).
    #[default]
    TeeToStderr,
}

/// Result of executing a command.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Combined stdout output.
    pub output: String,
    /// Captured stderr output (tee'd to parent stderr in real-time).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr_output: String,
    /// Last non-empty line or truncated output (max 200 chars).
    pub summary: String,
    /// Exit code (137 if timed out or cancelled, matching the SIGKILL convention).
    pub exit_code: i32,
}

pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STDIN_WRITE_TIMEOUT_SECS: u64 = 30;
/// Grace period between SIGTERM and SIGKILL on cancellation (spec.md §5).
pub const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawn-time process control options.
#[derive(Debug, Clone, Copy)]
pub struct SpawnOptions {
    /// Max duration allowed for writing prompt payload to child stdin.
    pub stdin_write_timeout: Duration,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            stdin_write_timeout: Duration::from_secs(DEFAULT_STDIN_WRITE_TIMEOUT_SECS),
        }
    }
}

/// Spawn a tool process without waiting for it to complete.
///
/// - Captures stdout/stderr (piped)
/// - Stdin is piped when `stdin_data` is provided, null otherwise
/// - Isolates the child in its own process group (`setsid`) so timeout and
///   cancellation can signal the whole group
/// - Enables `kill_on_drop` as a safety net
pub async fn spawn_tool(
    cmd: Command,
    stdin_data: Option<Vec<u8>>,
) -> Result<tokio::process::Child> {
    spawn_tool_with_options(cmd, stdin_data, SpawnOptions::default()).await
}

/// Spawn a tool process with explicit spawn options.
pub async fn spawn_tool_with_options(
    mut cmd: Command,
    stdin_data: Option<Vec<u8>>,
    spawn_options: SpawnOptions,
) -> Result<tokio::process::Child> {
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    if stdin_data.is_some() {
        cmd.stdin(std::process::Stdio::piped());
    } else {
        cmd.stdin(std::process::Stdio::null());
    }
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs before exec.
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }

    let mut child = cmd.spawn().context("failed to spawn command")?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            let stdin_write_timeout = spawn_options.stdin_write_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(stdin_write_timeout, async {
                    stdin.write_all(&data).await?;
                    stdin.shutdown().await?;
                    Ok::<_, std::io::Error>(())
                })
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("stdin write error: {}", e),
                    Err(_) => warn!(
                        timeout_secs = stdin_write_timeout.as_secs(),
                        "stdin write timed out"
                    ),
                }
            });
        } else {
            warn!("stdin was requested but no piped stdin handle was available");
        }
    }

    Ok(child)
}

/// Wait for a spawned child, capturing output and enforcing the wall-clock
/// `exec.run` timeout (default 300s, spec.md §5). `cancel` is an optional
/// cooperative-cancellation signal: when it flips to `true` the child is
/// terminated the same way a timeout terminates it.
pub async fn wait_and_capture_with_timeout(
    mut child: tokio::process::Child,
    stream_mode: StreamMode,
    timeout: Duration,
    mut cancel: Option<watch::Receiver<bool>>,
) -> Result<ExecutionResult> {
    let stdout = child.stdout.take().context("failed to capture stdout")?;
    let stderr = child.stderr.take().context("failed to capture stderr")?;

    const READ_BUF_SIZE: usize = 4096;
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);

    let mut output = String::new();
    let mut stdout_line_buf = String::new();
    let mut stderr_output = String::new();
    let mut stderr_line_buf = String::new();

    let started = Instant::now();
    let mut terminated_reason: Option<&'static str> = None;

    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    while !stdout_done || !stderr_done {
        tokio::select! {
            result = stdout_reader.read(&mut stdout_buf), if !stdout_done => {
                match result {
                    Ok(0) => {
                        flush_line_buf(&mut stdout_line_buf, &mut output, stream_mode);
                        stdout_done = true;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&stdout_buf[..n]);
                        accumulate_and_flush_lines(&chunk, &mut stdout_line_buf, &mut output, stream_mode);
                    }
                    Err(_) => {
                        flush_line_buf(&mut stdout_line_buf, &mut output, stream_mode);
                        stdout_done = true;
                    }
                }
            }
            result = stderr_reader.read(&mut stderr_buf), if !stderr_done => {
                match result {
                    Ok(0) => {
                        flush_line_buf(&mut stderr_line_buf, &mut stderr_output, StreamMode::BufferOnly);
                        stderr_done = true;
                    }
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&stderr_buf[..n]);
                        accumulate_and_flush_lines(&chunk, &mut stderr_line_buf, &mut stderr_output, StreamMode::BufferOnly);
                    }
                    Err(_) => {
                        flush_line_buf(&mut stderr_line_buf, &mut stderr_output, StreamMode::BufferOnly);
                        stderr_done = true;
                    }
                }
            }
            _ = async {
                match &mut cancel {
                    Some(rx) => { let _ = rx.changed().await; }
                    None => std::future::pending().await,
                }
            }, if cancel.as_ref().is_some_and(|rx| !*rx.borrow()) => {
                warn!("cancellation requested; terminating exec.run child");
                terminate_with_escalation(&mut child, DEFAULT_TERM_GRACE).await;
                terminated_reason = Some("cancelled");
                break;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if started.elapsed() >= timeout {
                    warn!(timeout_secs = timeout.as_secs(), "exec.run timed out; terminating child");
                    terminate_with_escalation(&mut child, DEFAULT_TERM_GRACE).await;
                    terminated_reason = Some("timeout");
                    break;
                }
            }
        }
    }

    if terminated_reason.is_some() {
        flush_line_buf(&mut stdout_line_buf, &mut output, stream_mode);
        flush_line_buf(&mut stderr_line_buf, &mut stderr_output, StreamMode::BufferOnly);
    }

    let status = child.wait().await.context("failed to wait for command")?;

    let exit_code = if let Some(reason) = terminated_reason {
        if !stderr_output.is_empty() && !stderr_output.ends_with('\n') {
            stderr_output.push('\n');
        }
        stderr_output.push_str(match reason {
            "timeout" => "exec.run timed out; process killed\n",
            _ => "exec.run cancelled; process killed\n",
        });
        137
    } else {
        status.code().unwrap_or_else(|| {
            warn!("process terminated by signal, using exit code 1");
            1
        })
    };

    let summary = if terminated_reason == Some("timeout") {
        format!("timed out after {}s", timeout.as_secs())
    } else if terminated_reason == Some("cancelled") {
        "cancelled".to_string()
    } else if exit_code == 0 {
        extract_summary(&output)
    } else {
        failure_summary(&output, &stderr_output, exit_code)
    };

    Ok(ExecutionResult {
        output,
        stderr_output,
        summary,
        exit_code,
    })
}

/// Execute a command end-to-end: spawn, wait with the default timeout, capture.
pub async fn run_and_capture(cmd: Command) -> Result<ExecutionResult> {
    run_and_capture_with_stdin(cmd, None, StreamMode::BufferOnly).await
}

/// Execute a command and capture output, optionally writing prompt data to stdin.
#[tracing::instrument(skip_all)]
pub async fn run_and_capture_with_stdin(
    cmd: Command,
    stdin_data: Option<Vec<u8>>,
    stream_mode: StreamMode,
) -> Result<ExecutionResult> {
    let child = spawn_tool(cmd, stdin_data).await?;
    wait_and_capture_with_timeout(
        child,
        stream_mode,
        Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
        None,
    )
    .await
}

/// Sends SIGTERM to the child's process group, waits up to `grace`, then
/// escalates to SIGKILL if it hasn't exited (spec.md §5 cancellation).
async fn terminate_with_escalation(child: &mut tokio::process::Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: kill() is async-signal-safe; negative PID targets the process group.
            unsafe {
                libc::kill(-(pid as i32), libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            return;
        }
    }
    let _ = child.start_kill();
}

fn accumulate_and_flush_lines(
    chunk: &str,
    line_buf: &mut String,
    output: &mut String,
    stream_mode: StreamMode,
) {
    line_buf.push_str(chunk);
    while let Some(newline_pos) = line_buf.find('\n') {
        let line: String = line_buf.drain(..=newline_pos).collect();
        if stream_mode == StreamMode::TeeToStderr {
            eprint!("[stdout] {line}");
        }
        output.push_str(&line);
    }
}

fn flush_line_buf(line_buf: &mut String, output: &mut String, stream_mode: StreamMode) {
    if !line_buf.is_empty() {
        if stream_mode == StreamMode::TeeToStderr {
            eprint!("[stdout] {line_buf}");
        }
        output.push_str(line_buf);
        line_buf.clear();
    }
}

/// Extract summary from output (last non-empty line, truncated to 200 chars).
fn extract_summary(output: &str) -> String {
    truncate_line(last_non_empty_line(output), 200)
}

/// Build a summary for failed executions (exit_code != 0).
///
/// Priority: stdout last non-empty line, then stderr last non-empty line,
/// then `"exit code {N}"`.
fn failure_summary(stdout: &str, stderr: &str, exit_code: i32) -> String {
    let stdout_line = last_non_empty_line(stdout);
    if !stdout_line.is_empty() {
        return truncate_line(stdout_line, 200);
    }
    let stderr_line = last_non_empty_line(stderr);
    if !stderr_line.is_empty() {
        return truncate_line(stderr_line, 200);
    }
    format!("exit code {exit_code}")
}

fn last_non_empty_line(text: &str) -> &str {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
}

fn truncate_line(line: &str, max_chars: usize) -> String {
    if line.chars().nth(max_chars).is_none() {
        line.to_string()
    } else {
        let truncated: String = line.chars().take(max_chars - 3).collect();
        format!("{truncated}...")
    }
}
