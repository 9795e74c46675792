//! Engine child process.
//!
//! The engine is spawned with:
//! - `kill_on_drop(true)` so a dropped session never leaves it running.
//! - stdout and stderr piped for diagnostic capture; stdin detached, since
//!   all commands travel over the socket.
//! - the listening port substituted into its argument list.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, info_span, warn};

use crate::config::EngineConfig;
use crate::connection::ChunkWriter;
use crate::{AppError, Result};

/// Bytes asking the engine to exit on its own.
pub const QUIT_SEQUENCE: &[u8] = b"quit();\n";

/// Placeholder in the configured arguments replaced by the listening port.
const PORT_PLACEHOLDER: &str = "{port}";

/// Fully resolved command line for one engine launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    /// Executable to run.
    pub program: String,
    /// Arguments, with the port already substituted.
    pub args: Vec<String>,
}

impl BackendCommand {
    /// Resolve the configured command line for `port`.
    #[must_use]
    pub fn from_config(config: &EngineConfig, port: u16) -> Self {
        let port = port.to_string();
        Self {
            program: config.program.clone(),
            args: config
                .args
                .iter()
                .map(|arg| arg.replace(PORT_PLACEHOLDER, &port))
                .collect(),
        }
    }
}

/// Identity of a launched engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHandle {
    /// OS process id of the spawned child.
    pub child_pid: Option<u32>,
    /// Process id the engine announced in its banner; may differ from the
    /// child when the engine is started through a wrapper script.
    pub engine_pid: Option<u32>,
    /// How many engines this session launched before this one.
    pub generation: u32,
}

/// Piped output streams of the child, handed to the diagnostic drains.
#[derive(Debug)]
pub struct DiagnosticPipes {
    /// The child's stdout.
    pub stdout: Option<ChildStdout>,
    /// The child's stderr.
    pub stderr: Option<ChildStderr>,
}

/// A running (or exited) engine process.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
    handle: BackendHandle,
    exit_status: Option<ExitStatus>,
    terminated: bool,
}

impl BackendProcess {
    /// Launch the engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the executable cannot be found or the OS
    /// refuses to create the process.
    pub fn start(command: &BackendCommand, generation: u32) -> Result<Self> {
        let span = info_span!("backend_start", program = %command.program, generation);
        let _guard = span.enter();

        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Spawn(format!("failed to launch `{}`: {err}", command.program))
            })?;

        let handle = BackendHandle {
            child_pid: child.id(),
            engine_pid: None,
            generation,
        };
        info!(child_pid = ?handle.child_pid, args = ?command.args, "engine launched");

        Ok(Self {
            child,
            handle,
            exit_status: None,
            terminated: false,
        })
    }

    /// Current process identity.
    #[must_use]
    pub fn handle(&self) -> BackendHandle {
        self.handle
    }

    /// Record the pid the engine announced in its startup banner.
    pub fn set_engine_pid(&mut self, pid: Option<u32>) {
        self.handle.engine_pid = pid;
    }

    /// Take the piped stdout/stderr; `None` after the first call.
    pub fn take_diagnostics(&mut self) -> Option<DiagnosticPipes> {
        let stdout = self.child.stdout.take();
        let stderr = self.child.stderr.take();
        if stdout.is_none() && stderr.is_none() {
            None
        } else {
            Some(DiagnosticPipes { stdout, stderr })
        }
    }

    /// Non-blocking exit check.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the OS cannot report the child's status.
    pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }
        let status = self
            .child
            .try_wait()
            .map_err(|err| AppError::Io(format!("failed to poll engine status: {err}")))?;
        if let Some(status) = status {
            info!(?status, "engine exited");
            self.exit_status = Some(status);
        }
        Ok(status)
    }

    /// Send an out-of-band interrupt (SIGINT) to the engine.
    ///
    /// Targets the pid from the banner when known, the child otherwise.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Interrupt` if no pid is known or the signal cannot
    /// be delivered.
    pub fn interrupt(&self) -> Result<()> {
        let pid = self
            .handle
            .engine_pid
            .or(self.handle.child_pid)
            .ok_or_else(|| AppError::Interrupt("engine pid unknown".into()))?;
        info!(pid, "interrupting engine");
        send_interrupt(pid)
    }

    /// Ask the engine to quit, then force-kill it after `grace`.
    ///
    /// The quit sequence is written to `writer` when a connection exists.
    /// Terminating an engine that already exited, or was already
    /// terminated, does nothing.
    pub async fn terminate(&mut self, writer: Option<&mut ChunkWriter>, grace: Duration) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if matches!(self.poll_exit(), Ok(Some(_))) {
            debug!("terminate: engine already exited");
            return;
        }

        if let Some(writer) = writer {
            if let Err(err) = writer.write_all(QUIT_SEQUENCE).await {
                debug!(%err, "terminate: could not send quit sequence");
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "engine exited gracefully");
                self.exit_status = Some(status);
            }
            Ok(Err(err)) => {
                warn!(%err, "terminate: error waiting for engine");
            }
            Err(_elapsed) => {
                warn!(?grace, "engine did not exit within grace period, forcing kill");
                if let Err(err) = self.child.kill().await {
                    warn!(%err, "terminate: failed to force-kill engine");
                }
                if let Ok(status) = self.child.try_wait() {
                    self.exit_status = status;
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| AppError::Interrupt(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGINT)
        .map_err(|err| AppError::Interrupt(format!("failed to signal pid {pid}: {err}")))
}

#[cfg(not(unix))]
fn send_interrupt(pid: u32) -> Result<()> {
    Err(AppError::Interrupt(format!(
        "interrupting pid {pid} is not supported on this platform"
    )))
}
