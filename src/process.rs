//! Process management utilities for blocks.
//!
//! Every block command is an opaque shell string run through `sh -c`. This
//! module owns the three ways blocks use a command:
//!
//! - **Captured**: run to completion and collect stdout (`RunOnce`,
//!   `RepeatEvery`, click updates)
//! - **Detached**: start and forget (`RunCommand` click actions)
//! - **Streaming**: keep running with stdout piped (`Persistent`)
//!
//! # Termination
//!
//! Streaming children are stopped gracefully: SIGTERM first, then a hard
//! kill if they have not exited within [`TERMINATE_GRACE`]. Children are also
//! `kill_on_drop` so a dropped handle never leaks a running process.

// Rust guideline compliant 2025-01

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};

use crate::constants::{SHELL, TERMINATE_GRACE};

/// Builds `sh -c <command>` with stdin detached.
fn shell(command: &str) -> Command {
    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(command).stdin(Stdio::null());
    cmd
}

/// Converts captured stdout into a string, failing on a non-zero exit.
fn check_output(command: &str, status: ExitStatus, stdout: &[u8]) -> Result<String> {
    if !status.success() {
        bail!("`{}` exited with {}", command, status);
    }
    Ok(String::from_utf8_lossy(stdout).into_owned())
}

/// Runs `command` to completion and returns its stdout.
///
/// Stderr is inherited so command diagnostics land next to our own logs.
///
/// # Errors
///
/// Fails if the shell cannot be spawned or the command exits non-zero.
pub async fn run_captured(command: &str) -> Result<String> {
    let output = shell(command)
        .stderr(Stdio::inherit())
        .output()
        .await
        .with_context(|| format!("Failed to run `{}`", command))?;
    check_output(command, output.status, &output.stdout)
}

/// Blocking variant of [`run_captured`] with extra environment variables.
///
/// Used by click updates, which run on tokio's blocking pool.
pub fn run_captured_blocking(command: &str, env: &[(String, String)]) -> Result<String> {
    let output = std::process::Command::new(SHELL)
        .arg("-c")
        .arg(command)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("Failed to run `{}`", command))?;
    check_output(command, output.status, &output.stdout)
}

/// Starts `command` without waiting for it or reading its output.
///
/// Tokio reaps the child in the background once the handle is dropped.
pub fn spawn_detached(command: &str) -> Result<()> {
    let child = shell(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn `{}`", command))?;
    log::debug!("[process] Spawned detached `{}` (pid {:?})", command, child.id());
    Ok(())
}

/// Starts a long-lived `command` with stdout piped for line reading.
pub fn spawn_streaming(command: &str) -> Result<Child> {
    shell(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn `{}`", command))
}

/// Sends SIGTERM to a child that is still running.
///
/// Best-effort: a child that already exited (no pid) is left alone.
pub fn terminate(child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    log::debug!("[process] Sending SIGTERM to PID {}", pid);
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

/// Terminates `child` and collects its exit status.
///
/// SIGTERM first, then SIGKILL after [`TERMINATE_GRACE`].
pub async fn stop(child: &mut Child) -> Result<ExitStatus> {
    terminate(child);
    if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        return Ok(status?);
    }
    log::debug!("[process] Child ignored SIGTERM, killing");
    child.start_kill().context("Failed to kill child")?;
    Ok(child.wait().await?)
}

/// Waits up to `grace` for `child` to exit on its own, then stops it.
///
/// Returns the exit status and whether the child had to be stopped.
pub async fn wait_or_stop(child: &mut Child, grace: Duration) -> Result<(ExitStatus, bool)> {
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return Ok((status?, false));
    }
    Ok((stop(child).await?, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_run_captured_returns_stdout() {
        let out = run_captured("printf 'hello\\n'").await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_run_captured_fails_on_nonzero_exit() {
        let err = run_captured("echo partial; exit 3").await.unwrap_err();
        assert!(err.to_string().contains("exited with"), "{err}");
    }

    #[test]
    fn test_run_captured_blocking_sees_env() {
        let env = vec![("BLOCK_BUTTON".to_string(), "3".to_string())];
        let out = run_captured_blocking("printf '%s' \"$BLOCK_BUTTON\"", &env).unwrap();
        assert_eq!(out, "3");
    }

    #[tokio::test]
    async fn test_spawn_detached_does_not_wait() {
        let start = std::time::Instant::now();
        spawn_detached("sleep 2").unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_child() {
        let mut child = spawn_streaming("sleep 30").unwrap();
        let status = stop(&mut child).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_wait_or_stop_lets_finished_child_exit() {
        let mut child = spawn_streaming("echo done").unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "done\n");

        let (status, stopped) = wait_or_stop(&mut child, Duration::from_secs(2)).await.unwrap();
        assert!(status.success());
        assert!(!stopped);
    }
}
