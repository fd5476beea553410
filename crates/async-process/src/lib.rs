//! A thin bridge from `std::process` to async code, used in place of tokio's
//! own `"process"` feature (see the root `Cargo.toml` comment on why that
//! feature is avoided in this workspace: https://github.com/tokio-rs/tokio/issues/3520).
//! A spawned child's stdio comes back as `tokio::fs::File`, so the usual
//! `tokio::io` combinators (`AsyncBufReadExt::lines`, `AsyncWriteExt::write_all`,
//! ...) work on it unchanged; waiting for exit runs the blocking
//! `std::process::Child::wait` on a blocking-pool thread via `spawn_blocking`.

pub use std::process::Command;

use std::time::Duration;

#[cfg(unix)]
use std::os::fd::OwnedFd as OwnedImpl;
#[cfg(windows)]
use std::os::fd::OwnedHandle as OwnedImpl;

pub struct Child {
    inner: std::process::Child,

    pub stdin: Option<ChildStdio>,
    pub stdout: Option<ChildStdio>,
    pub stderr: Option<ChildStdio>,
}

pub type ChildStdio = tokio::fs::File;

impl From<std::process::Child> for Child {
    fn from(mut inner: std::process::Child) -> Self {
        let stdin = map_stdio(inner.stdin.take());
        let stdout = map_stdio(inner.stdout.take());
        let stderr = map_stdio(inner.stderr.take());

        Self {
            inner,
            stdin,
            stdout,
            stderr,
        }
    }
}

impl Child {
    /// Blocks a worker thread until the child exits, consuming the handle.
    /// Use this once you're done racing anything else against this child —
    /// at final reap time after a `kill`, or when nothing else needs to win
    /// first.
    pub async fn wait(mut self) -> std::io::Result<std::process::ExitStatus> {
        let handle = tokio::runtime::Handle::current().spawn_blocking(move || self.inner.wait());
        handle.await.expect("wait does not panic")
    }

    /// Polls for exit at `interval` without consuming the handle, so a caller
    /// can race this future inside `tokio::select!` against other events and
    /// still call `kill` on the same handle afterward. Safe to drop mid-poll:
    /// unlike `wait`, nothing here is handed off to a detached blocking thread.
    pub async fn wait_polling(
        &mut self,
        interval: Duration,
    ) -> std::io::Result<std::process::ExitStatus> {
        loop {
            if let Some(status) = self.inner.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }

    pub fn kill(&mut self) -> std::io::Result<()> {
        self.inner.kill()
    }
}

fn map_stdio<F>(f: Option<F>) -> Option<ChildStdio>
where
    F: Into<OwnedImpl>,
{
    let f: Option<OwnedImpl> = f.map(Into::into);
    let f: Option<std::fs::File> = f.map(Into::into);
    f.map(Into::into)
}

/// Spawns `cmd` with stdin null and stdout/stderr piped, then concurrently
/// drains both into memory while waiting for exit: the same
/// spawn-then-service-stdio shape used for streaming children, collapsed to
/// a single call for the "run once, decode the output" case.
pub async fn output(mut cmd: Command) -> std::io::Result<std::process::Output> {
    use tokio::io::AsyncReadExt;

    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child: Child = cmd.spawn()?.into();
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();
    let mut stdout = child.stdout.take().expect("stdout is piped");
    let mut stderr = child.stderr.take().expect("stderr is piped");

    let stdout_fut = stdout.read_to_end(&mut stdout_buf);
    let stderr_fut = stderr.read_to_end(&mut stderr_buf);
    let (_, _, status) = tokio::try_join!(stdout_fut, stderr_fut, child.wait())?;

    Ok(std::process::Output {
        status,
        stdout: stdout_buf,
        stderr: stderr_buf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello; exit 0");
        let out = output(cmd).await.unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn output_reports_nonzero_exit_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo oops >&2; exit 7");
        let out = output(cmd).await.unwrap();
        assert!(!out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stderr).trim(), "oops");
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());
        let mut child: Child = cmd.spawn().unwrap().into();

        child.kill().unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child exits promptly after kill")
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn wait_polling_observes_a_natural_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 0");
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());
        let mut child: Child = cmd.spawn().unwrap().into();

        let status = child.wait_polling(Duration::from_millis(5)).await.unwrap();
        assert!(status.success());
    }
}
