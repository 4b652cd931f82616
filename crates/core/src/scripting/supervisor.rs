//! Detached worker processes under a supervising task.
//!
//! [`spawn_worker`] starts the script in its own process group with piped
//! stdout/stderr and returns immediately. The child handle moves into a
//! tokio task which streams stdout through a [`ProgressParser`], collects
//! stderr, enforces the optional watchdog timeout (killing the worker's
//! whole process group) and finally reports one [`WorkerSignal::Exited`]. The process is never killed on drop, so it
//! outlives both the handle and the server if it has to.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;

use super::worker::{SpawnError, WorkerCommand, WorkerExit, WorkerHandle, WorkerSignal};
use crate::job::MAX_OUTPUT_BYTES;
use crate::progress::ProgressParser;

/// Read buffer size for stdout.
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Signals buffered before the supervisor waits on its consumer.
const SIGNAL_BUFFER: usize = 64;

/// How long to keep draining output after the process itself is gone.
/// Grandchildren that inherited the pipes can otherwise hold them open.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Start `command` as a detached worker and hand back its signal stream.
pub fn spawn_worker(command: WorkerCommand) -> Result<WorkerHandle, SpawnError> {
    let script_path = command.script_path();
    if !script_path.is_file() {
        return Err(SpawnError::ScriptNotFound(
            script_path.display().to_string(),
        ));
    }

    let mut cmd = Command::new(&command.interpreter);
    cmd.arg(&command.script)
        .current_dir(&command.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    for (key, value) in &command.env_vars {
        cmd.env(key, value);
    }
    // Own process group: terminal signals aimed at the server do not reach it.
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn()?;
    let pid = child.id();
    let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);

    tracing::debug!(
        pid,
        interpreter = %command.interpreter,
        script = %command.script,
        "Worker process spawned",
    );

    tokio::spawn(supervise(child, tx, command.timeout));

    Ok(WorkerHandle { pid, signals: rx })
}

async fn supervise(
    mut child: Child,
    signals: mpsc::Sender<WorkerSignal>,
    timeout: Option<Duration>,
) {
    let start = Instant::now();

    let stdout_task = tokio::spawn(pump_stdout(child.stdout.take(), signals.clone()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    let timed_out = waited.is_none();
    if timed_out {
        tracing::warn!(pid = child.id(), elapsed_ms, "Worker exceeded its timeout, killing");
        if let Err(e) = kill_worker(&mut child) {
            tracing::error!(error = %e, "Failed to kill timed out worker");
        }
        let _ = child.wait().await;
    }

    let stdout = drain(stdout_task).await;
    let stderr = drain(stderr_task).await;

    let exit = match waited {
        None => WorkerExit::TimedOut {
            elapsed_ms,
            stdout,
            stderr,
        },
        Some(Ok(status)) => WorkerExit::Finished {
            code: status.code(),
            stdout,
            stderr,
            duration_ms: elapsed_ms,
        },
        Some(Err(e)) => WorkerExit::Lost {
            reason: format!("failed to wait for worker: {e}"),
        },
    };

    // The receiver may be gone; the worker is finished either way.
    let _ = signals.send(WorkerSignal::Exited(exit)).await;
}

/// Kill the worker together with everything it started.
///
/// The worker leads its own process group, so the group id is its pid.
#[cfg(unix)]
fn kill_worker(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // Safety: kill(2) takes no pointers; a negative pid addresses the group.
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_worker(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

/// Stream stdout into line signals while keeping a copy of the raw bytes.
async fn pump_stdout(stdout: Option<ChildStdout>, signals: mpsc::Sender<WorkerSignal>) -> Vec<u8> {
    let mut captured = Vec::new();
    let Some(mut stdout) = stdout else {
        return captured;
    };

    let mut parser = ProgressParser::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                append_capped(&mut captured, &buf[..n]);
                for line in parser.feed(&buf[..n]) {
                    let _ = signals.send(WorkerSignal::Line(line)).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read worker stdout");
                break;
            }
        }
    }
    if let Some(line) = parser.finish() {
        let _ = signals.send(WorkerSignal::Line(line)).await;
    }
    captured
}

/// Read a stream until EOF, keeping only its tail.
///
/// The pipe stays open for as long as the worker writes to it; closing it
/// early would kill the worker with `SIGPIPE`.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut captured = Vec::new();
    let Some(mut reader) = handle else {
        return captured;
    };

    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => append_capped(&mut captured, &buf[..n]),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read worker stderr");
                break;
            }
        }
    }
    captured
}

/// Append, then drop the oldest bytes once the buffer is twice the cap.
fn append_capped(buffer: &mut Vec<u8>, data: &[u8]) {
    buffer.extend_from_slice(data);
    if buffer.len() > MAX_OUTPUT_BYTES * 2 {
        let excess = buffer.len() - MAX_OUTPUT_BYTES;
        buffer.drain(..excess);
    }
}

async fn drain(task: tokio::task::JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(Ok(bytes)) => {
            let tail = &bytes[bytes.len().saturating_sub(MAX_OUTPUT_BYTES)..];
            String::from_utf8_lossy(tail).into_owned()
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!("Worker output still open after exit, giving up on it");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use assert_matches::assert_matches;

    use super::*;
    use crate::progress::OutputLine;
    use crate::scripting::test_helpers::{bash_command, write_script};

    async fn collect(mut handle: WorkerHandle) -> (Vec<OutputLine>, WorkerExit) {
        let mut lines = Vec::new();
        while let Some(signal) = handle.signals.recv().await {
            match signal {
                WorkerSignal::Line(line) => lines.push(line),
                WorkerSignal::Exited(exit) => return (lines, exit),
            }
        }
        panic!("signal channel closed without an exit signal");
    }

    #[tokio::test]
    async fn reports_progress_then_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "storage-audit.js",
            "echo 'Progress: 50% Scanning buckets'\necho 'Found 2 buckets'\n",
        );

        let handle = spawn_worker(bash_command(dir.path(), "storage-audit.js")).expect("spawn");
        let (lines, exit) = collect(handle).await;

        assert_eq!(
            lines,
            vec![
                OutputLine::Progress {
                    percent: 50,
                    step: "Scanning buckets".into()
                },
                OutputLine::Text("Found 2 buckets".into()),
            ]
        );
        assert_matches!(exit, WorkerExit::Finished { code: Some(0), stdout, .. } => {
            assert!(stdout.contains("Found 2 buckets"));
        });
    }

    #[tokio::test]
    async fn captures_stderr_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "fail.js", "echo 'permission denied' >&2\nexit 1\n");

        let handle = spawn_worker(bash_command(dir.path(), "fail.js")).expect("spawn");
        let (_, exit) = collect(handle).await;

        assert_matches!(exit, WorkerExit::Finished { code: Some(1), stderr, .. } => {
            assert_eq!(stderr.trim(), "permission denied");
        });
    }

    #[tokio::test]
    async fn passes_environment_and_working_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "env.js", "echo \"$GCP_PROJECT_ID\"\npwd\n");

        let mut cmd = bash_command(dir.path(), "env.js");
        cmd.env_vars
            .push(("GCP_PROJECT_ID".to_string(), "proj-1".to_string()));
        let (lines, _) = collect(spawn_worker(cmd).expect("spawn")).await;

        assert_eq!(lines[0], OutputLine::Text("proj-1".into()));
        let expected = dir.path().canonicalize().expect("canonicalize");
        assert_matches!(&lines[1], OutputLine::Text(pwd) => {
            assert_eq!(Path::new(pwd).canonicalize().expect("canonicalize pwd"), expected);
        });
    }

    #[tokio::test]
    async fn watchdog_kills_hung_worker() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "hang.js", "echo 'Progress: 10% Waiting'\nexec sleep 60\n");

        let mut cmd = bash_command(dir.path(), "hang.js");
        cmd.timeout = Some(Duration::from_millis(300));
        let started = Instant::now();
        let (lines, exit) = collect(spawn_worker(cmd).expect("spawn")).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(lines.len(), 1);
        assert_matches!(exit, WorkerExit::TimedOut { .. });
    }

    #[tokio::test]
    async fn large_stderr_is_drained_until_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "noisy.js",
            "printf '%*s' 12582912 '' >&2\necho done\nexit 0\n",
        );

        let handle = spawn_worker(bash_command(dir.path(), "noisy.js")).expect("spawn");
        let (lines, exit) = collect(handle).await;

        assert_eq!(lines, vec![OutputLine::Text("done".into())]);
        assert_matches!(exit, WorkerExit::Finished { code: Some(0), stderr, .. } => {
            assert_eq!(stderr.len(), MAX_OUTPUT_BYTES);
        });
    }

    /// A process is gone once it is no longer listed or only a zombie remains.
    #[cfg(target_os = "linux")]
    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn watchdog_kills_whole_process_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(
            dir.path(),
            "all-audits.js",
            "sleep 60 &\necho $! > child.pid\nwait\n",
        );

        let mut cmd = bash_command(dir.path(), "all-audits.js");
        cmd.timeout = Some(Duration::from_millis(500));
        let (_, exit) = collect(spawn_worker(cmd).expect("spawn")).await;
        assert_matches!(exit, WorkerExit::TimedOut { .. });

        let pid: u32 = std::fs::read_to_string(dir.path().join("child.pid"))
            .expect("child pid")
            .trim()
            .parse()
            .expect("pid");
        let mut gone = false;
        for _ in 0..100 {
            if process_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "background child {pid} survived the timeout");
    }

    #[tokio::test]
    async fn missing_script_fails_synchronously() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = spawn_worker(bash_command(dir.path(), "nope.js"));
        assert_matches!(result, Err(SpawnError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn missing_interpreter_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_script(dir.path(), "ok.js", "exit 0\n");
        let mut cmd = bash_command(dir.path(), "ok.js");
        cmd.interpreter = "/definitely/not/an/interpreter".into();
        assert_matches!(spawn_worker(cmd), Err(SpawnError::Io(_)));
    }

    #[test]
    fn append_capped_drops_oldest_bytes() {
        let mut buffer = vec![b'a'; MAX_OUTPUT_BYTES * 2];
        append_capped(&mut buffer, b"tail");
        assert_eq!(buffer.len(), MAX_OUTPUT_BYTES);
        assert!(buffer.ends_with(b"tail"));
    }
}
