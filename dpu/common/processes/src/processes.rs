// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use nix::sys::signal::Signal;
use signal_hook::{
    consts::signal::{SIGCHLD, SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    process::{Child, ChildStdin, ChildStdout, Command, ExitStatus},
    thread::sleep,
    time::{Duration, Instant},
};
use tracing::{instrument, warn};

// run runs a child process, with some special signal handling:
//   - Forwards SIGTERM to the child processes
//   - Ignores SIGINT while the processes is running. SIGINT is normally generated
//     by the terminal when Ctrl+C is pressed. The signal is sent to all processes
//     in the foreground processes group, so the child receives it anyway.
#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run(cmd: &mut Command) -> Result<ExitStatus> {
    // Register the signal handler before spawning the process to ensure we don't drop any signals.
    let mut signals = Signals::new([SIGCHLD, SIGINT, SIGTERM])?;

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {cmd:?}"))?;

    for signal in signals.forever() {
        match signal {
            SIGCHLD => match &child.try_wait()? {
                Some(status) => return Ok(*status),
                None => continue,
            },
            SIGINT => {}
            SIGTERM => send_signal(&child, Signal::SIGTERM)?,
            _ => unreachable!(),
        }
    }
    unreachable!()
}

#[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
pub fn run_and_check(cmd: &mut Command) -> Result<()> {
    let status = run(cmd)?;
    if !status.success() {
        bail!("Command {cmd:?} failed with {status}");
    }

    Ok(())
}

fn send_signal(child: &Child, signal: Signal) -> Result<()> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(child.id().try_into()?), signal)?;
    Ok(())
}

/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Owns a running child process, such as an external compressor in a
/// pipeline.
///
/// If the guard is dropped before [`ChildGuard::wait_and_check`] reaped the
/// child (e.g. because the pipeline failed halfway), the child is sent
/// SIGTERM, then SIGKILL if it is still alive after a grace period, and is
/// always reaped.
pub struct ChildGuard {
    name: String,
    child: Option<Child>,
}

impl ChildGuard {
    #[instrument(skip_all, fields(command = %cmd.get_program().to_string_lossy()))]
    pub fn spawn(cmd: &mut Command) -> Result<Self> {
        let name = cmd.get_program().to_string_lossy().into_owned();
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {cmd:?}"))?;
        Ok(Self {
            name,
            child: Some(child),
        })
    }

    /// Returns the process ID of the child, unless it has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Takes the write end of the child's piped stdin.
    pub fn take_stdin(&mut self) -> Result<ChildStdin> {
        self.child
            .as_mut()
            .and_then(|child| child.stdin.take())
            .with_context(|| format!("{} has no piped stdin", self.name))
    }

    /// Takes the read end of the child's piped stdout.
    pub fn take_stdout(&mut self) -> Result<ChildStdout> {
        self.child
            .as_mut()
            .and_then(|child| child.stdout.take())
            .with_context(|| format!("{} has no piped stdout", self.name))
    }

    /// Waits for the child to exit and fails unless it exited successfully.
    pub fn wait_and_check(mut self) -> Result<()> {
        let mut child = self
            .child
            .take()
            .with_context(|| format!("{} was already reaped", self.name))?;
        // Close our end of its stdin so that it sees EOF.
        drop(child.stdin.take());
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {}", self.name))?;
        if !status.success() {
            bail!("{} exited with {}", self.name, status);
        }
        Ok(())
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        drop(child.stdin.take());
        drop(child.stdout.take());
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }

        warn!("Terminating {} (pid {})", self.name, child.id());
        if send_signal(&child, Signal::SIGTERM).is_ok() {
            let deadline = Instant::now() + TERMINATE_GRACE_PERIOD;
            while Instant::now() < deadline {
                if let Ok(Some(_)) = child.try_wait() {
                    return;
                }
                sleep(Duration::from_millis(10));
            }
        }

        warn!("Killing {} (pid {})", self.name, child.id());
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use super::*;

    #[test]
    fn runs_process() -> Result<()> {
        run_and_check(&mut Command::new("true"))?;
        Ok(())
    }

    #[test]
    fn runs_failed_process() -> Result<()> {
        run(&mut Command::new("false"))?;
        assert!(run_and_check(&mut Command::new("false")).is_err());
        Ok(())
    }

    #[test]
    fn guard_reports_exit_status() -> Result<()> {
        ChildGuard::spawn(&mut Command::new("true"))?.wait_and_check()?;

        let err = ChildGuard::spawn(&mut Command::new("false"))?
            .wait_and_check()
            .unwrap_err();
        assert!(err.to_string().starts_with("false exited with"), "{err}");
        Ok(())
    }

    #[test]
    fn guard_hands_out_stdin_once() -> Result<()> {
        let mut guard = ChildGuard::spawn(
            Command::new("cat")
                .stdin(Stdio::piped())
                .stdout(Stdio::null()),
        )?;
        let stdin = guard.take_stdin()?;
        assert!(guard.take_stdin().is_err());
        drop(stdin);
        guard.wait_and_check()?;
        Ok(())
    }

    #[test]
    fn dropping_guard_terminates_child() -> Result<()> {
        let start = Instant::now();
        let guard = ChildGuard::spawn(Command::new("sleep").arg("60"))?;
        let pid = guard.id().context("child is running")?;
        drop(guard);

        assert!(start.elapsed() < Duration::from_secs(30));
        // The child has been reaped, so the pid no longer refers to it.
        assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err());
        Ok(())
    }

    #[test]
    fn dropping_guard_kills_child_ignoring_sigterm() -> Result<()> {
        let start = Instant::now();
        let guard = ChildGuard::spawn(Command::new("sh").args(["-c", "trap '' TERM; sleep 60"]))?;
        // Give the shell a moment to install the trap.
        sleep(Duration::from_millis(200));
        drop(guard);
        assert!(start.elapsed() < Duration::from_secs(30));
        Ok(())
    }
}
