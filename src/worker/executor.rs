//! Script execution contract (§6): the worker invokes the resolved script
//! path as a child process, inheriting a minimal environment, and reads the
//! outcome purely from the exit code plus captured combined stdout+stderr.
//! No other IPC channel exists.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};

pub struct ExecutionOutcome {
    pub success: bool,
    pub timed_out: bool,
    pub output: String,
}

/// Both stdout and stderr drain into this so the combined length — not
/// either stream alone — is what gets capped against `max_bytes`.
type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Drain `reader` into the shared `buf` until EOF, stopping further writes
/// once the combined buffer reaches `max_bytes` — this must keep reading
/// for the whole process lifetime even after the cap is hit, or the child
/// can block forever writing into a full pipe.
async fn drain(mut reader: impl tokio::io::AsyncRead + Unpin, buf: SharedBuf, max_bytes: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock().await;
                if guard.len() < max_bytes {
                    let remaining = max_bytes - guard.len();
                    guard.extend_from_slice(&chunk[..n.min(remaining)]);
                }
            }
        }
    }
}

/// Kill the script's whole process group, not just its direct PID — a
/// shell script invoking its own children would otherwise orphan them past
/// the worker's timeout. Falls back to killing just the child if the pgid
/// was never read (e.g. spawn raced a signal).
fn kill_process_tree(child: &mut Child, pgid: Option<i32>) {
    match pgid {
        // SAFETY: killpg is async-signal-safe; pgid is a plain process
        // group id read from the child handle right after spawn, not a
        // pointer, so there is nothing to dereference incorrectly.
        Some(pgid) => {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

/// Spawn `script_path` as a child process with a hard wall-clock timeout,
/// capturing combined stdout+stderr up to `max_bytes`. On timeout the
/// process tree is killed.
pub async fn execute(
    script_path: &std::path::Path,
    timeout: Duration,
    max_bytes: usize,
) -> AppResult<ExecutionOutcome> {
    let working_dir = script_path.parent().unwrap_or_else(|| std::path::Path::new("."));

    let mut command = Command::new(script_path);
    command
        .current_dir(working_dir)
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        // New process group so a timeout can kill the whole tree instead
        // of just the immediate child (e.g. a shell script's own children).
        .process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| AppError::script_execution(format!("failed to spawn script: {e}")))?;

    // With process_group(0), the child's pid is also its process group id.
    let pgid = child.id().map(|pid| pid as i32);

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let combined_buf: SharedBuf = Arc::new(Mutex::new(Vec::new()));
    let out_task = tokio::spawn(drain(stdout, combined_buf.clone(), max_bytes));
    let err_task = tokio::spawn(drain(stderr, combined_buf.clone(), max_bytes));

    let timed_out;
    let success;
    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| AppError::script_execution(format!("waiting on child failed: {e}")))?;
            success = status.success();
            timed_out = false;
        }
        _ = tokio::time::sleep(timeout) => {
            kill_process_tree(&mut child, pgid);
            let _ = child.wait().await;
            success = false;
            timed_out = true;
        }
    }

    let _ = out_task.await;
    let _ = err_task.await;

    let combined = combined_buf.lock().await.clone();
    let mut output = String::from_utf8_lossy(&combined).into_owned();
    if timed_out {
        output.push_str("\n... [timed out]");
    } else if output.len() >= max_bytes {
        output.push_str("... [truncated]");
    }

    Ok(ExecutionOutcome {
        success,
        timed_out,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn successful_script_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo hello; exit 0");
        let outcome = execute(&script, Duration::from_secs(5), 1024).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.timed_out);
        assert!(outcome.output.contains("hello"));
    }

    #[tokio::test]
    async fn failing_script_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo oops 1>&2; exit 1");
        let outcome = execute(&script, Duration::from_secs(5), 1024).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("oops"));
    }

    #[tokio::test]
    async fn slow_script_is_killed_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 30; exit 0");
        let outcome = execute(&script, Duration::from_millis(200), 1024).await.unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn output_is_truncated_to_cap() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "noisy.sh", "head -c 4096 /dev/zero | tr '\\0' 'a'");
        let outcome = execute(&script, Duration::from_secs(5), 128).await.unwrap();
        assert!(outcome.output.contains("truncated"));
    }

    #[tokio::test]
    async fn stdout_and_stderr_share_one_combined_cap() {
        let dir = tempfile::tempdir().unwrap();
        // Each stream alone stays under the cap; only their sum exceeds it,
        // so this only fails if the two streams are capped independently.
        let script = write_script(
            dir.path(),
            "both_streams.sh",
            "head -c 300 /dev/zero | tr '\\0' 'a'; head -c 300 /dev/zero | tr '\\0' 'b' 1>&2",
        );
        let outcome = execute(&script, Duration::from_secs(5), 128).await.unwrap();
        let body_len = outcome.output.len() - "... [truncated]".len();
        assert!(body_len <= 128, "combined capture exceeded the cap: {body_len} bytes");
        assert!(outcome.output.contains("truncated"));
    }

    #[tokio::test]
    async fn timeout_kills_the_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("child_survived");
        // Backgrounds a grandchild that outlives the timed-out shell unless
        // the whole process group is killed, not just the shell's own pid.
        let script = write_script(
            dir.path(),
            "forker.sh",
            &format!("(sleep 0.3; touch {}) & wait", marker.display()),
        );
        let outcome = execute(&script, Duration::from_millis(100), 1024).await.unwrap();
        assert!(outcome.timed_out);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!marker.exists(), "backgrounded grandchild survived the process-group kill");
    }
}
