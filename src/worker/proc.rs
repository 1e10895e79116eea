//! Process-isolated execution units.
//!
//! Each unit is a re-exec of the current binary with `--internal-worker`.
//! One end of a Unix socket pair becomes the child's stdin and carries the
//! JSON-lines protocol in both directions; stdout and stderr are inherited so
//! printed content and worker logs land in the run's own streams.

use super::ipc::{LineReader, LineWriter};
use super::protocol::{ControllerMessage, UnitMessage};
use super::signals::TerminationReason;
use super::unit::{ExecutionUnit, Isolation, UnitBacking, UnitLauncher};
use crate::error::{ParafmtError, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Flag that switches the binary into the unit role.
pub const INTERNAL_WORKER_FLAG: &str = "--internal-worker";

/// Launches units as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    /// Launcher that re-executes the running binary.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| ParafmtError::Spawn(format!("Failed to get current executable: {}", e)))?;
        Ok(Self::new(program))
    }

    /// Launcher for an explicit binary (used by integration tests).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![OsString::from(INTERNAL_WORKER_FLAG)],
            envs: Vec::new(),
        }
    }

    /// Set an environment variable for every spawned worker.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn spawn_child(&self, index: usize) -> Result<ExecutionUnit> {
        let label = format!("process-{}", index);
        let (parent_end, child_end) = std::os::unix::net::UnixStream::pair()
            .map_err(|e| ParafmtError::Spawn(format!("Failed to create socket pair: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::from(OwnedFd::from(child_end)))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ParafmtError::Spawn(format!("Failed to spawn {}: {}", label, e)))?;
        // Close our copy of the child's end so EOF propagates when it exits
        drop(cmd);

        let pid = child.id();
        debug!(unit = %label, pid, "Spawned worker process");

        parent_end.set_nonblocking(true)?;
        let stream = tokio::net::UnixStream::from_std(parent_end)?;
        let (read_half, write_half) = stream.into_split();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));

        tokio::spawn(write_loop(label.clone(), write_half, out_rx));
        tokio::spawn(read_loop(
            label.clone(),
            read_half,
            child,
            in_tx,
            Arc::clone(&exited),
        ));

        let backing = ProcessBacking { pid, exited };
        Ok(ExecutionUnit::new(label, out_tx, in_rx, Box::new(backing)))
    }
}

impl UnitLauncher for ProcessLauncher {
    fn isolation(&self) -> Isolation {
        Isolation::Process
    }

    async fn spawn(&self, index: usize) -> Result<ExecutionUnit> {
        self.spawn_child(index)
    }
}

/// Serialize outbound messages onto the socket.
///
/// Closing the channel shuts down the write direction, which the worker sees
/// as end of input.
async fn write_loop(
    label: String,
    write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ControllerMessage>,
) {
    let mut writer = LineWriter::new(write_half);
    while let Some(message) = rx.recv().await {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(unit = %label, error = %e, "Failed to encode message");
                continue;
            }
        };
        trace!(unit = %label, bytes = line.len(), "Sending message");
        if let Err(e) = writer.write_line(&line).await {
            debug!(unit = %label, error = %e, "Worker socket closed for writing");
            return;
        }
    }
    writer.shutdown().await.ok();
}

/// Decode inbound lines until EOF, then reap the child.
///
/// Always ends the inbound channel with an error: `Transport` for a bad
/// envelope or socket failure, `UnitExited` with the exit reason otherwise.
async fn read_loop(
    label: String,
    read_half: OwnedReadHalf,
    mut child: Child,
    tx: mpsc::UnboundedSender<Result<UnitMessage>>,
    exited: Arc<AtomicBool>,
) {
    let mut reader = LineReader::new(read_half);
    let failure = loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match UnitMessage::from_line(line) {
                    Ok(message) => {
                        if tx.send(Ok(message)).is_err() {
                            break None;
                        }
                    }
                    Err(e) => {
                        break Some(ParafmtError::Transport {
                            unit: label.clone(),
                            message: format!("invalid envelope: {}", e),
                        });
                    }
                }
            }
            Ok(None) => break None,
            Err(e) => {
                break Some(ParafmtError::Transport {
                    unit: label.clone(),
                    message: e.to_string(),
                });
            }
        }
    };

    if failure.is_some() {
        child.start_kill().ok();
    }
    let reason = match child.wait().await {
        Ok(status) => TerminationReason::from_exit_status(status),
        Err(e) => {
            debug!(unit = %label, error = %e, "Failed to reap worker");
            TerminationReason::Disconnected
        }
    };
    exited.store(true, Ordering::SeqCst);
    debug!(unit = %label, %reason, "Worker process ended");

    let error = failure.unwrap_or_else(|| ParafmtError::UnitExited {
        unit: label,
        reason: reason.to_string(),
    });
    tx.send(Err(error)).ok();
}

/// Sends SIGTERM to a live worker process.
struct ProcessBacking {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

impl UnitBacking for ProcessBacking {
    fn terminate(&mut self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        let Some(pid) = self.pid.take() else {
            return;
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            trace!(pid, error = %e, "SIGTERM not delivered");
        }
    }
}
