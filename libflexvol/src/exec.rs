//! External command execution for mount executors and the symlink step.
//!
//! Shell integration is isolated here so the protocol code stays testable and
//! every command gets the same stderr capture and timeout handling.

use std::ffi::OsStr;
use std::fmt::Debug;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{FlexError, FlexResult};

/// Captured result of a finished command.
#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` and return its output regardless of exit status.
pub(crate) async fn output<A: AsRef<OsStr> + Debug>(
    program: &str,
    args: &[A],
    timeout: Option<Duration>,
) -> FlexResult<CommandOutput> {
    debug!(%program, ?args, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let fut = cmd.output();
    let out = match timeout {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| FlexError::Timeout {
                op: program.to_owned(),
                after,
            })?,
        None => fut.await,
    }
    .map_err(|e| FlexError::mounter(program, e))?;

    Ok(CommandOutput {
        status: out.status,
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
    })
}

/// Run `program` and fail with its stderr when it exits non-zero.
pub(crate) async fn run<A: AsRef<OsStr> + Debug>(
    program: &str,
    args: &[A],
    timeout: Option<Duration>,
) -> FlexResult<CommandOutput> {
    let out = output(program, args, timeout).await?;
    if !out.status.success() {
        let reason = if out.stderr.is_empty() {
            format!("exited with {}", out.status)
        } else {
            out.stderr.clone()
        };
        return Err(FlexError::mounter(program, reason));
    }
    Ok(out)
}

/// Return `true` if `path` is currently listed as a mount point in
/// `/proc/self/mounts`.
///
/// Mount paths handled here never contain whitespace, so the octal escapes
/// used by the kernel do not need decoding.
pub(crate) async fn is_mountpoint(path: &Path) -> bool {
    let contents = match tokio::fs::read_to_string("/proc/self/mounts").await {
        Ok(c) => c,
        Err(_) => return false,
    };
    let Some(path) = path.to_str() else {
        return false;
    };
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    contents
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = run("echo", &["hello"], None).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_fails_with_stderr() {
        let err = run("ls", &["/definitely/not/here"], None).await.unwrap_err();
        match err {
            FlexError::Mounter { op, reason } => {
                assert_eq!(op, "ls");
                assert!(!reason.is_empty());
            }
            other => panic!("expected mounter error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_times_out() {
        let err = run("sleep", &["5"], Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, FlexError::Timeout { .. }));
    }

    #[tokio::test]
    async fn plain_directory_is_not_a_mountpoint() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_mountpoint(tmp.path()).await);
        assert!(!is_mountpoint(Path::new("/definitely/not/mounted")).await);
    }
}
