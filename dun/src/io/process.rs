//! Bounded child-process execution shared by harness calls and check commands.

use std::io::{self, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Wall-clock and memory bounds for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Stdout followed by stderr, for tools that report on either stream.
    pub fn combined_text(&self) -> String {
        let mut text = self.stdout_text();
        let stderr = self.stderr_text();
        if !stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }
        text
    }

    /// Short human-readable reason for a failed run.
    pub fn failure_reason(&self, limits: &ProcessLimits) -> String {
        if self.timed_out {
            return format!("timed out after {}s", limits.timeout.as_secs());
        }
        let code = self
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        let stderr = last_lines(&self.stderr_text(), 5);
        if stderr.is_empty() {
            format!("exit status {code}")
        } else {
            format!("exit status {code}: {stderr}")
        }
    }
}

/// Last `count` non-empty lines of `text`, joined with newlines.
pub fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// How long to keep draining output after the child is gone.
///
/// Grandchildren that inherited the pipes can hold them open indefinitely;
/// past this grace period whatever was captured so far is returned.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Bytes a reader thread kept, plus how many it discarded over the limit.
struct Chunk {
    kept: Vec<u8>,
    dropped: usize,
}

/// Run a command with a timeout, feeding optional stdin and capturing both streams.
///
/// Stdin is written and both streams are drained on their own threads, so
/// neither a child that never reads its input nor one that floods its output
/// can hold the caller past the timeout. On timeout the child is killed and
/// whatever it printed is still returned.
#[instrument(
    skip_all,
    fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes)
)]
pub fn run_with_limits(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: ProcessLimits,
) -> Result<CapturedOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
            return Err(err).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_rx = spawn_reader(stdout, limit);
    let stderr_rx = spawn_reader(stderr, limit);

    let writer = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let (stdout, stdout_dropped) = drain(&stdout_rx, deadline, "stdout")?;
    let (stderr, stderr_dropped) = drain(&stderr_rx, deadline, "stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "output truncated");
    }
    if let Some(writer) = writer {
        finish_writer(writer);
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

/// Read `reader` to EOF on a background thread, keeping at most `limit` bytes.
fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
) -> Receiver<io::Result<Chunk>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        let mut kept_total = 0usize;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            };
            let keep = n.min(limit.saturating_sub(kept_total));
            kept_total += keep;
            let sent = tx.send(Ok(Chunk {
                kept: chunk[..keep].to_vec(),
                dropped: n - keep,
            }));
            if sent.is_err() {
                break;
            }
        }
    });
    rx
}

/// Collect a reader's chunks until EOF or `deadline`, whichever comes first.
fn drain(
    rx: &Receiver<io::Result<Chunk>>,
    deadline: Instant,
    stream: &str,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut dropped = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(chunk)) => {
                buf.extend_from_slice(&chunk.kept);
                dropped += chunk.dropped;
            }
            Ok(Err(err)) => return Err(err).with_context(|| format!("read {stream}")),
            Err(RecvTimeoutError::Disconnected) => return Ok((buf, dropped)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(stream, "output still open after child exit, returning partial output");
                return Ok((buf, dropped));
            }
        }
    }
}

/// Reap the stdin writer if it is done; a writer stuck on a pipe held by a
/// grandchild is left behind.
fn finish_writer(writer: thread::JoinHandle<io::Result<()>>) {
    if !writer.is_finished() {
        warn!("stdin writer still blocked, abandoning it");
        return;
    }
    match writer.join() {
        Ok(Ok(())) => {}
        // A child that exits without reading its input is judged by its exit status.
        Ok(Err(err)) => warn!(err = %err, "child closed stdin early"),
        Err(_) => warn!("stdin writer thread panicked"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn limits(timeout_ms: u64, output_limit_bytes: usize) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_millis(timeout_ms),
            output_limit_bytes,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let out = run_with_limits(sh("cat"), Some(b"ping"), limits(5_000, 1024)).expect("run");
        assert!(out.success());
        assert_eq!(out.stdout_text(), "ping");
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_with_limits(sh("printf 'abcdefghij'"), None, limits(5_000, 4)).expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.stdout_dropped, 6);
    }

    #[test]
    fn reports_nonzero_exit_with_stderr_tail() {
        let lim = limits(5_000, 1024);
        let out = run_with_limits(sh("echo boom >&2; exit 3"), None, lim).expect("run");
        assert!(!out.success());
        assert_eq!(out.failure_reason(&lim), "exit status 3: boom");
    }

    #[test]
    fn kills_on_timeout() {
        let lim = limits(100, 1024);
        let out = run_with_limits(sh("sleep 5"), None, lim).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.failure_reason(&lim).starts_with("timed out"));
    }

    #[test]
    fn unread_stdin_does_not_outlive_the_timeout() {
        let input = vec![b'x'; 1 << 20];
        let started = Instant::now();
        let out = run_with_limits(sh("sleep 4"), Some(&input), limits(300, 1024)).expect("run");
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[test]
    fn grandchild_holding_output_does_not_outlive_the_timeout() {
        let started = Instant::now();
        let out = run_with_limits(sh("echo early; sleep 4 & wait"), None, limits(300, 1024))
            .expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
        assert_eq!(out.stdout_text(), "early\n");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("dun-definitely-missing-binary");
        assert!(run_with_limits(cmd, None, limits(1_000, 16)).is_err());
    }

    #[test]
    fn last_lines_skips_blank_lines() {
        assert_eq!(last_lines("a\n\nb\nc\n\n", 2), "b\nc");
        assert_eq!(last_lines("", 3), "");
    }
}
