//! Uniform handle over an isolated execution unit.
//!
//! Both backends ([`ProcessLauncher`](super::proc::ProcessLauncher) and
//! [`ThreadLauncher`](super::thread::ThreadLauncher)) produce the same
//! [`ExecutionUnit`]: an outbound channel of controller messages, an inbound
//! channel of unit messages that ends in `UnitExited` when the unit goes away,
//! and a backing that knows how to stop the underlying process or thread.

use super::protocol::{ControllerMessage, UnitMessage};
use crate::error::{ParafmtError, Result};
use std::future::Future;
use tokio::sync::mpsc;

/// Isolation mechanism backing every unit of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Separate OS process running `parafmt --internal-worker`.
    Process,
    /// Dedicated OS thread with its own runtime.
    Thread,
}

impl std::fmt::Display for Isolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Thread => write!(f, "thread"),
        }
    }
}

/// Creates execution units of a single isolation kind.
pub trait UnitLauncher: Send + Sync + 'static {
    /// Isolation kind of every unit this launcher creates.
    fn isolation(&self) -> Isolation;

    /// Create a unit. `index` is unique per pool and only used for labels.
    ///
    /// Resolves once the unit can accept messages.
    fn spawn(&self, index: usize) -> impl Future<Output = Result<ExecutionUnit>> + Send;
}

/// Stops the resource behind a unit.
pub trait UnitBacking: Send {
    fn terminate(&mut self);
}

/// Backing with nothing to stop beyond closing the channels.
pub struct ChannelBacking;

impl UnitBacking for ChannelBacking {
    fn terminate(&mut self) {}
}

/// Handle to one live execution unit.
pub struct ExecutionUnit {
    label: String,
    outbound: Option<mpsc::UnboundedSender<ControllerMessage>>,
    inbound: Option<mpsc::UnboundedReceiver<Result<UnitMessage>>>,
    backing: Box<dyn UnitBacking>,
}

impl ExecutionUnit {
    /// Assemble a unit from its channels.
    ///
    /// The sender side of `inbound` must push `Err(UnitExited)` when the unit
    /// stops; if it is simply dropped, [`UnitMessages`] reports the exit itself.
    pub fn new(
        label: impl Into<String>,
        outbound: mpsc::UnboundedSender<ControllerMessage>,
        inbound: mpsc::UnboundedReceiver<Result<UnitMessage>>,
        backing: Box<dyn UnitBacking>,
    ) -> Self {
        Self {
            label: label.into(),
            outbound: Some(outbound),
            inbound: Some(inbound),
            backing,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send a message to the unit. Fire-and-forget.
    pub fn send(&self, message: ControllerMessage) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or_else(|| ParafmtError::Transport {
            unit: self.label.clone(),
            message: "unit was terminated".to_string(),
        })?;
        outbound.send(message).map_err(|_| ParafmtError::UnitExited {
            unit: self.label.clone(),
            reason: "unit stopped accepting messages".to_string(),
        })
    }

    /// Take the inbound message sequence. Only one subscriber is supported.
    pub fn messages(&mut self) -> Result<UnitMessages> {
        let rx = self.inbound.take().ok_or_else(|| {
            ParafmtError::Protocol(format!("messages of {} already taken", self.label))
        })?;
        Ok(UnitMessages {
            label: self.label.clone(),
            rx,
            finished: false,
        })
    }

    /// Stop the unit deliberately.
    pub fn terminate(&mut self) {
        self.outbound = None;
        self.backing.terminate();
    }
}

impl Drop for ExecutionUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Inbound messages from one unit, in arrival order.
pub struct UnitMessages {
    label: String,
    rx: mpsc::UnboundedReceiver<Result<UnitMessage>>,
    finished: bool,
}

impl UnitMessages {
    /// Next message. After an error or exit, yields `None` forever.
    ///
    /// A channel that closes without an explicit error still ends with
    /// `UnitExited`: a unit never completes normally.
    pub async fn next(&mut self) -> Option<Result<UnitMessage>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(message)) => Some(Ok(message)),
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                Some(Err(ParafmtError::UnitExited {
                    unit: self.label.clone(),
                    reason: "connection closed".to_string(),
                }))
            }
        }
    }
}
