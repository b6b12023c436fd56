use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use flycode_errors::AppError;
use flycode_errors::Result;

pub(crate) struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.kill();
}

fn read_capped(mut stream: impl Read, remaining: Arc<AtomicU64>, truncated: Arc<AtomicBool>) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        let budget = remaining.load(Ordering::SeqCst);
        if budget == 0 {
            truncated.store(true, Ordering::SeqCst);
            continue;
        }
        let take = (n as u64).min(budget) as usize;
        out.extend_from_slice(&chunk[..take]);
        remaining.fetch_sub(take as u64, Ordering::SeqCst);
        if take < n {
            truncated.store(true, Ordering::SeqCst);
        }
    }
    out
}

/// Spawn `program` with `args` under `cwd`/`env`, collect stdout/stderr
/// under a shared byte budget, and enforce `timeout_ms` — the primitive
/// behind both Process Runner surface operations (`spec.md` §4.H).
pub(crate) fn spawn_and_collect(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &HashMap<String, String>,
    timeout_ms: u64,
    max_output_bytes: u64,
    use_shell: bool,
) -> Result<RawOutput> {
    let mut command = if use_shell {
        #[cfg(unix)]
        {
            let mut c = Command::new("/bin/sh");
            c.arg("-c").arg(program);
            c
        }
        #[cfg(not(unix))]
        {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(program);
            c
        }
    } else {
        let mut c = Command::new(program);
        c.args(args);
        c
    };

    command
        .current_dir(cwd)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|e| AppError::internal(format!("spawning `{program}`: {e}")))?;

    let stdout = child.stdout.take().ok_or_else(|| AppError::internal("stdout pipe unavailable"))?;
    let stderr = child.stderr.take().ok_or_else(|| AppError::internal("stderr pipe unavailable"))?;

    let remaining = Arc::new(AtomicU64::new(max_output_bytes));
    let truncated = Arc::new(AtomicBool::new(false));

    let stdout_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    let stdout_handle = {
        let remaining = remaining.clone();
        let truncated = truncated.clone();
        let stdout_buf = stdout_buf.clone();
        thread::spawn(move || {
            let data = read_capped(stdout, remaining, truncated);
            *stdout_buf.lock().unwrap_or_else(|e| e.into_inner()) = data;
        })
    };
    let stderr_handle = {
        let remaining = remaining.clone();
        let truncated = truncated.clone();
        let stderr_buf = stderr_buf.clone();
        thread::spawn(move || {
            let data = read_capped(stderr, remaining, truncated);
            *stderr_buf.lock().unwrap_or_else(|e| e.into_inner()) = data;
        })
    };

    let deadline = start + Duration::from_millis(timeout_ms);
    let mut timed_out = false;
    let mut killed_for_cap = false;

    let exit_status = loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|e| AppError::internal(format!("waiting on `{program}`: {e}")))?
        {
            break Some(status);
        }
        if Instant::now() >= deadline {
            timed_out = true;
            send_sigterm(&child);
            let _ = child.wait();
            break None;
        }
        if !killed_for_cap && remaining.load(Ordering::SeqCst) == 0 && truncated.load(Ordering::SeqCst) {
            killed_for_cap = true;
            send_sigterm(&child);
        }
        thread::sleep(Duration::from_millis(10));
    };

    let exit_status = match exit_status {
        Some(status) => Some(status),
        None => child.wait().ok(),
    };

    stdout_handle.join().ok();
    stderr_handle.join().ok();

    let stdout = stdout_buf.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let stderr = stderr_buf.lock().unwrap_or_else(|e| e.into_inner()).clone();

    #[cfg(unix)]
    let exit_code = exit_status.and_then(|s| {
        use std::os::unix::process::ExitStatusExt;
        s.code().or(s.signal().map(|_| -1))
    });
    #[cfg(not(unix))]
    let exit_code = exit_status.and_then(|s| s.code());

    Ok(RawOutput {
        exit_code,
        stdout,
        stderr,
        duration: start.elapsed(),
        timed_out,
        truncated: truncated.load(Ordering::SeqCst),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// `yes` never exits on its own; the shared byte budget must cap it and
    /// trigger SIGTERM well before the 5s timeout would.
    #[test]
    fn output_cap_truncates_and_terminates_before_timeout() {
        let dir = tempdir().expect("tempdir");
        let raw = spawn_and_collect(
            "yes",
            &[],
            dir.path(),
            &HashMap::new(),
            5_000,
            64,
            false,
        )
        .expect("spawn_and_collect");

        assert!(raw.truncated);
        assert!(!raw.timed_out);
        assert!(raw.stdout.len() as u64 <= 64);
        assert!(raw.duration < Duration::from_millis(5_000));
    }
}
