//! Shell execution for approved commands.
//!
//! Used by the daemon (as root) and by the client's direct fallback (as the
//! invoking user). The child runs `sh -c <command>` in its own process
//! group with a curated environment; stdout/stderr are capped per stream so
//! a chatty command cannot balloon memory; on timeout the whole process
//! group is killed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;

use crate::error::Result;

/// Cap per output stream.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Environment variables a child is allowed to inherit. Everything else is
/// dropped; the daemon must not leak its own environment into commands the
/// planner wrote.
const INHERITED_ENV: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TERM"];

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Clone)]
pub struct ExecParams {
    pub command: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct ExecOutput {
    /// `-1` when no exit code was observed (killed, timed out).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Live child process groups, shared with whoever owns shutdown. The
/// daemon uses this to terminate in-flight commands that outlast the
/// graceful drain window.
#[derive(Clone, Default)]
pub struct ChildTracker {
    pids: Arc<Mutex<HashSet<i32>>>,
}

impl ChildTracker {
    fn insert(&self, pid: i32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.insert(pid);
        }
    }

    fn remove(&self, pid: i32) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.remove(&pid);
        }
    }

    pub fn len(&self) -> usize {
        self.pids.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SIGKILL every tracked process group.
    pub fn kill_all(&self) {
        let pids: Vec<i32> = self
            .pids
            .lock()
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        for pid in pids {
            kill_process_group(Some(pid as u32));
        }
    }
}

/// Run a single shell command to completion (or timeout). Spawn failures
/// are the only error path; a non-zero exit or timeout is a normal
/// [`ExecOutput`].
pub async fn run_command(params: &ExecParams) -> Result<ExecOutput> {
    run_tracked(params, None).await
}

/// Like [`run_command`], registering the child's process group with
/// `tracker` for the duration of the run.
pub async fn run_tracked(params: &ExecParams, tracker: Option<&ChildTracker>) -> Result<ExecOutput> {
    let start = Instant::now();

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&params.command)
        .current_dir(&params.working_dir)
        .env_clear();
    for key in INHERITED_ENV {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    if std::env::var("PATH").is_err() {
        cmd.env("PATH", DEFAULT_PATH);
    }

    // No stdin: commands that probe it would otherwise hang forever.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a timeout can take down the whole pipeline the
    // shell may have spawned, not just the shell.
    #[cfg(unix)]
    cmd.process_group(0);

    cmd.kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let child_pid = child.id();
    if let (Some(tracker), Some(pid)) = (tracker, child_pid) {
        tracker.insert(pid as i32);
    }

    let stdout_reader = child.stdout.take().ok_or_else(|| {
        std::io::Error::other("stdout pipe was unexpectedly not available")
    })?;
    let stderr_reader = child.stderr.take().ok_or_else(|| {
        std::io::Error::other("stderr pipe was unexpectedly not available")
    })?;

    let stdout_handle = tokio::spawn(read_capped(BufReader::new(stdout_reader)));
    let stderr_handle = tokio::spawn(read_capped(BufReader::new(stderr_reader)));

    let mut timed_out = false;
    let exit_code = match tokio::time::timeout(params.timeout, child.wait()).await {
        Ok(status) => status?.code().unwrap_or(-1),
        Err(_) => {
            timed_out = true;
            kill_process_group(child_pid);
            child.start_kill()?;
            let _ = child.wait().await;
            -1
        }
    };

    if let (Some(tracker), Some(pid)) = (tracker, child_pid) {
        tracker.remove(pid as i32);
    }

    let stdout = stdout_handle
        .await
        .map_err(std::io::Error::other)??;
    let stderr = stderr_handle
        .await
        .map_err(std::io::Error::other)??;

    Ok(ExecOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        duration: start.elapsed(),
        timed_out,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::Signal;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Read a stream to EOF, keeping at most [`MAX_OUTPUT_BYTES`]. Reading
/// continues past the cap to avoid back-pressuring the child; the excess is
/// discarded.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut tmp = [0u8; 8192];
    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        let room = MAX_OUTPUT_BYTES.saturating_sub(buf.len());
        if room > 0 {
            buf.extend_from_slice(&tmp[..n.min(room)]);
        }
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn params(command: &str, timeout: Duration) -> ExecParams {
        ExecParams {
            command: command.to_string(),
            working_dir: std::env::temp_dir(),
            timeout,
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let out = run_command(&params("echo hello", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let out = run_command(&params("echo oops >&2; exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = Instant::now();
        let out = run_command(&params("sleep 30", Duration::from_millis(200)))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.exit_code, -1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn runs_in_the_requested_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = run_command(&ExecParams {
            command: "pwd".to_string(),
            working_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(5),
        })
        .await
        .unwrap();
        let printed = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn output_is_capped() {
        // ~4 MiB of output, capped at 1 MiB.
        let out = run_command(&params(
            "head -c 4194304 /dev/zero | tr '\\0' 'x'",
            Duration::from_secs(20),
        ))
        .await
        .unwrap();
        assert_eq!(out.stdout.len(), MAX_OUTPUT_BYTES);
    }

    #[tokio::test]
    async fn environment_is_curated() {
        // set_var is unsafe in edition 2024; fine in a single-threaded test.
        unsafe {
            std::env::set_var("GANESHA_TEST_SECRET", "do-not-leak");
        }
        let out = run_command(&params("printenv GANESHA_TEST_SECRET; true", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!out.stdout.contains("do-not-leak"));
    }
}
