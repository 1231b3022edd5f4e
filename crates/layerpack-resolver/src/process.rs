use std::{
    io::Read,
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use layerpack_domain::Deadline;

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `program` to completion, capturing stdout/stderr.
///
/// When a deadline is given the child is killed once it expires and the
/// call fails with a timeout attributed to `stage`.
pub fn run_command(
    program: &Path,
    args: &[String],
    envs: &[(&str, &str)],
    cwd: &Path,
    deadline: Option<&Deadline>,
    stage: &str,
) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }
    tracing::debug!(program = %program.display(), ?args, "spawning");

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout missing for {}", program.display()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr missing for {}", program.display()))?;
    let stdout_handle = thread::spawn(move || read_to_string_limited(stdout));
    let stderr_handle = thread::spawn(move || read_to_string_limited(stderr));

    let code = wait_with_deadline(&mut child, deadline, stage)?;
    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow!("stdout thread panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow!("stderr thread panicked"))??;
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}

fn wait_with_deadline(child: &mut Child, deadline: Option<&Deadline>, stage: &str) -> Result<i32> {
    let Some(deadline) = deadline else {
        let status = child.wait().context("failed to wait for child process")?;
        return Ok(status.code().unwrap_or(-1));
    };
    let expires_at = Instant::now() + deadline.remaining();
    loop {
        if let Some(status) = child.try_wait().context("failed to poll child process")? {
            return Ok(status.code().unwrap_or(-1));
        }
        if Instant::now() >= expires_at {
            let _ = child.kill();
            let _ = child.wait();
            return Err(deadline.timeout(stage).into());
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_to_string_limited(mut reader: impl Read) -> Result<String> {
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0_u8; 8192];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        let room = MAX_CAPTURE_BYTES.saturating_sub(captured.len());
        if room < read {
            truncated = true;
        }
        captured.extend_from_slice(&buf[..read.min(room)]);
    }
    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str("\n[...truncated...]\n");
    }
    Ok(text)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn captures_output_and_exit_code() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let output = run_command(
            &PathBuf::from("sh"),
            &["-c".into(), "echo out; echo err >&2; exit 3".into()],
            &[],
            dir.path(),
            None,
            "test",
        )?;
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        Ok(())
    }

    #[test]
    fn kills_child_when_deadline_expires() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let deadline = Deadline::new(Duration::from_millis(100));
        let err = run_command(
            &PathBuf::from("sh"),
            &["-c".into(), "sleep 5".into()],
            &[],
            dir.path(),
            Some(&deadline),
            "resolve",
        )
        .unwrap_err();
        let packaging = err
            .downcast_ref::<layerpack_domain::PackagingError>()
            .expect("timeout error");
        assert_eq!(packaging.kind(), "TimeoutError");
        Ok(())
    }
}
