//! Emulator process supervision.
//!
//! ```text
//! spawn ──► running ──┬── exits on its own ─────────────► Exited
//!                     └── cancel ──► SIGINT ──┬── ok ───► TerminatedGracefully
//!                                             └── fail ─► kill ──┬── ok ──► Killed
//!                                                                └── fail ─► Leaked
//! ```
//!
//! The working directory is removed after every outcome, once the process is
//! gone (or given up on). A run cancelled before the emulator is spawned ends
//! as [`Termination::Cancelled`].

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};

use gom_core::error::{MachineError, Result};
use tokio::process::{Child, Command};

use crate::qemu::LaunchPlan;
use crate::workdir::WorkDir;

/// How a supervised run ended.
#[derive(Debug)]
pub enum Termination {
    /// Cancelled before the emulator was started.
    Cancelled,
    /// The emulator exited on its own.
    Exited(ExitStatus),
    /// Cancelled; the emulator stopped after SIGINT.
    TerminatedGracefully(ExitStatus),
    /// Cancelled; SIGINT could not be delivered so the emulator was killed.
    Killed(Option<ExitStatus>),
    /// Cancelled; neither signal could be delivered.
    Leaked { pid: u32 },
}

impl Termination {
    /// Whether the run ended because of a cancellation request.
    pub fn was_cancelled(&self) -> bool {
        !matches!(self, Termination::Exited(_))
    }

    /// Process exit code for the whole run.
    ///
    /// A cancelled run is a clean shutdown and maps to 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::Exited(status) => status_code(status),
            _ => 0,
        }
    }
}

fn status_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Delivers the graceful-stop signal to a pid.
type Interrupt = fn(u32) -> io::Result<()>;

/// Runs one emulator process to completion.
pub struct Supervisor;

impl Supervisor {
    /// Supervise `plan` until it exits or `cancel` resolves, then remove
    /// `workdir`.
    pub async fn run<F>(plan: &LaunchPlan, workdir: WorkDir, cancel: F) -> Result<Termination>
    where
        F: Future<Output = ()>,
    {
        Self::run_with(plan, workdir, cancel, interrupt).await
    }

    async fn run_with<F>(
        plan: &LaunchPlan,
        workdir: WorkDir,
        cancel: F,
        interrupt: Interrupt,
    ) -> Result<Termination>
    where
        F: Future<Output = ()>,
    {
        let result = Self::supervise_with(plan, cancel, interrupt).await;
        workdir.cleanup();
        result
    }

    /// Supervise `plan` without touching any working directory.
    pub async fn supervise<F>(plan: &LaunchPlan, cancel: F) -> Result<Termination>
    where
        F: Future<Output = ()>,
    {
        Self::supervise_with(plan, cancel, interrupt).await
    }

    async fn supervise_with<F>(
        plan: &LaunchPlan,
        cancel: F,
        interrupt: Interrupt,
    ) -> Result<Termination>
    where
        F: Future<Output = ()>,
    {
        let (program, args) = plan.command();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                MachineError::LaunchError(format!(
                    "failed to start {}: {}",
                    program.to_string_lossy(),
                    e
                ))
            })?;

        let pid = child.id();
        tracing::info!(
            pid,
            program = %program.to_string_lossy(),
            privileged = plan.needs_privileges,
            "Emulator started"
        );

        tokio::pin!(cancel);
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = &mut cancel => None,
        };

        match exited {
            Some(status) => {
                let status = status.map_err(|e| {
                    MachineError::SupervisionError(format!("failed to wait for emulator: {}", e))
                })?;
                tracing::info!(pid, %status, "Emulator exited");
                Ok(Termination::Exited(status))
            }
            None => Ok(terminate(&mut child, pid, interrupt).await),
        }
    }
}

/// Stop a running child: SIGINT, then kill if SIGINT cannot be sent.
async fn terminate(child: &mut Child, pid: Option<u32>, interrupt: Interrupt) -> Termination {
    tracing::info!(pid, "Shutdown requested, stopping emulator");

    match pid.map(interrupt) {
        Some(Ok(())) => match child.wait().await {
            Ok(status) => {
                tracing::info!(pid, %status, "Emulator stopped cleanly");
                return Termination::TerminatedGracefully(status);
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to wait for interrupted emulator");
            }
        },
        Some(Err(e)) => {
            tracing::warn!(pid, error = %e, "Failed to interrupt emulator, killing it");
        }
        None => {
            tracing::warn!("Emulator has no pid, killing it");
        }
    }

    match child.start_kill() {
        Ok(()) => {
            let status = child.wait().await.ok();
            tracing::info!(pid, ?status, "Emulator killed");
            Termination::Killed(status)
        }
        Err(e) => {
            let pid = pid.unwrap_or_default();
            tracing::error!(pid, error = %e, "Emulator process might have been leaked");
            Termination::Leaked { pid }
        }
    }
}

/// Send SIGINT to `pid`.
fn interrupt(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;

    // SAFETY: plain signal delivery to a positive pid we spawned
    let ret = unsafe { libc::kill(pid, libc::SIGINT) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
