//! Thread-isolated execution units.
//!
//! Each unit owns a dedicated OS thread with a single-threaded runtime that
//! drives the same runner a worker process does, over typed channels.

use super::protocol::UnitMessage;
use super::signals::TerminationReason;
use super::unit::{ChannelBacking, ExecutionUnit, Isolation, UnitLauncher};
use super::worker_main::{RunnerContext, run_unit};
use crate::error::{ParafmtError, Result};
use tokio::sync::mpsc;
use tracing::debug;

/// Launches units as OS threads.
#[derive(Clone, Default)]
pub struct ThreadLauncher {
    context: RunnerContext,
}

impl ThreadLauncher {
    pub fn new(context: RunnerContext) -> Self {
        Self { context }
    }
}

impl UnitLauncher for ThreadLauncher {
    fn isolation(&self) -> Isolation {
        Isolation::Thread
    }

    async fn spawn(&self, index: usize) -> Result<ExecutionUnit> {
        let label = format!("thread-{}", index);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<UnitMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let context = self.context.clone();

        let handle = std::thread::Builder::new()
            .name(format!("parafmt-{}", label))
            .spawn(move || -> Result<()> {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(run_unit(out_rx, reply_tx, context))
            })
            .map_err(|e| ParafmtError::Spawn(format!("Failed to spawn {}: {}", label, e)))?;

        debug!(unit = %label, "Spawned worker thread");

        // Forward replies; once the runner drops its sender, join the thread
        // and report why it stopped.
        let monitor_label = label.clone();
        tokio::spawn(async move {
            while let Some(message) = reply_rx.recv().await {
                if in_tx.send(Ok(message)).is_err() {
                    break;
                }
            }
            let reason = match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(Ok(()))) => TerminationReason::Exited(0),
                Ok(Ok(Err(e))) => TerminationReason::Failed(e.to_string()),
                Ok(Err(payload)) => TerminationReason::from_panic(payload),
                Err(_) => TerminationReason::Disconnected,
            };
            debug!(unit = %monitor_label, %reason, "Worker thread ended");
            in_tx
                .send(Err(ParafmtError::UnitExited {
                    unit: monitor_label,
                    reason: reason.to_string(),
                }))
                .ok();
        });

        Ok(ExecutionUnit::new(label, out_tx, in_rx, Box::new(ChannelBacking)))
    }
}
