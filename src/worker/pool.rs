//! Worker pool for parallel formatting.
//!
//! A single dispatcher task owns the pool state: the units sorted by load,
//! the table of batches awaiting a result, the FIFO of batches waiting for a
//! free unit, and the id counter. Callers talk to it through the cloneable
//! [`WorkerPool`] handle.
//!
//! Units are spawned lazily up to the configured concurrency. Each unit holds
//! at most one batch at a time, so a unit's `active` count is always 0 or 1.

use super::protocol::{ControllerMessage, FileDescriptor, FormatResult, Mode, UnitMessage};
use super::unit::{ExecutionUnit, UnitLauncher};
use crate::error::{ParafmtError, Result};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of execution units.
    pub concurrency: usize,
    /// Mode announced to every unit in its `Init`.
    pub mode: Mode,
}

/// Point-in-time view of the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Outstanding batches per unit, least loaded first.
    pub unit_loads: Vec<usize>,
    /// Units spawned so far.
    pub spawned: usize,
    /// Batches sent to a unit so far.
    pub dispatched: u64,
    /// Batches waiting for a free unit.
    pub queued: usize,
    /// Id the next dispatched batch will get.
    pub next_id: u64,
}

/// Statistics returned by [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub units_spawned: usize,
    pub batches_completed: u64,
}

type Reply = oneshot::Sender<Result<FormatResult>>;

enum Command {
    Dispatch {
        files: Vec<FileDescriptor>,
        reply: Reply,
    },
    Snapshot(oneshot::Sender<PoolSnapshot>),
    Shutdown(oneshot::Sender<PoolStats>),
}

/// Inbound traffic from a unit, tagged with the unit's index.
enum UnitEvent {
    Message { index: usize, message: UnitMessage },
    Failed { index: usize, error: ParafmtError },
}

/// Cloneable handle to a running dispatcher.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerPool {
    /// Start the dispatcher task. No unit is spawned until work arrives.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<L: UnitLauncher>(launcher: L, config: PoolConfig) -> Result<Self> {
        if config.concurrency == 0 {
            return Err(ParafmtError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        debug!(
            concurrency = config.concurrency,
            mode = ?config.mode,
            isolation = %launcher.isolation(),
            "Starting worker pool"
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(launcher, config, events_tx);
        tokio::spawn(dispatcher.run(command_rx, events_rx));
        Ok(Self { commands })
    }

    /// Format one batch on the least-loaded unit.
    ///
    /// Fails with `UnitExited` (or `Transport`) if the unit dies before
    /// answering; after that every call fails the same way.
    pub async fn format(&self, files: Vec<FileDescriptor>) -> Result<FormatResult> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Dispatch { files, reply })
            .map_err(|_| ParafmtError::PoolClosed)?;
        rx.await.map_err(|_| ParafmtError::PoolClosed)?
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply))
            .map_err(|_| ParafmtError::PoolClosed)?;
        rx.await.map_err(|_| ParafmtError::PoolClosed)
    }

    /// Stop accepting work and terminate every unit.
    ///
    /// Calls still waiting for a result fail with `PoolClosed`.
    pub async fn shutdown(&self) -> Result<PoolStats> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(reply))
            .map_err(|_| ParafmtError::PoolClosed)?;
        rx.await.map_err(|_| ParafmtError::PoolClosed)
    }
}

/// One entry of the pool state.
struct UnitHandle {
    index: usize,
    unit: ExecutionUnit,
    active: usize,
}

struct PendingBatch {
    unit: usize,
    reply: Reply,
}

struct QueuedBatch {
    files: Vec<FileDescriptor>,
    reply: Reply,
}

struct Dispatcher<L> {
    launcher: L,
    config: PoolConfig,
    /// Sorted by ascending `active`; ties keep insertion order.
    units: Vec<UnitHandle>,
    pending: HashMap<u64, PendingBatch>,
    queue: VecDeque<QueuedBatch>,
    next_id: u64,
    spawned: usize,
    dispatched: u64,
    completed: u64,
    fatal: Option<ParafmtError>,
    events: mpsc::UnboundedSender<UnitEvent>,
}

impl<L: UnitLauncher> Dispatcher<L> {
    fn new(launcher: L, config: PoolConfig, events: mpsc::UnboundedSender<UnitEvent>) -> Self {
        Self {
            launcher,
            config,
            units: Vec::with_capacity(config.concurrency),
            pending: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 0,
            spawned: 0,
            dispatched: 0,
            completed: 0,
            fatal: None,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<UnitEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispatch { files, reply }) => self.dispatch(files, reply).await,
                    Some(Command::Snapshot(reply)) => {
                        reply.send(self.snapshot()).ok();
                    }
                    Some(Command::Shutdown(reply)) => {
                        reply.send(self.shutdown()).ok();
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
            }
        }
    }

    async fn dispatch(&mut self, files: Vec<FileDescriptor>, reply: Reply) {
        if let Some(err) = &self.fatal {
            reply.send(Err(err.replay())).ok();
            return;
        }
        self.queue.push_back(QueuedBatch { files, reply });
        self.drain_queue().await;
    }

    /// Assign queued batches while a unit is free or can be spawned.
    async fn drain_queue(&mut self) {
        while !self.queue.is_empty() && self.fatal.is_none() {
            if self.units.len() < self.config.concurrency
                && let Err(e) = self.spawn_unit().await
            {
                self.fail(e);
                return;
            }

            match self.units.first() {
                Some(head) if head.active == 0 => {}
                _ => {
                    trace!(queued = self.queue.len(), "All units busy");
                    return;
                }
            }

            if let Some(batch) = self.queue.pop_front() {
                self.assign(batch);
            }
        }
    }

    /// Spawn a unit, send its `Init` and put it at the front of the pool.
    async fn spawn_unit(&mut self) -> Result<()> {
        let index = self.spawned;
        let mut unit = self.launcher.spawn(index).await?;
        let mut messages = unit.messages()?;
        unit.send(ControllerMessage::init(self.config.mode))?;
        self.spawned += 1;

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(item) = messages.next().await {
                let event = match item {
                    Ok(message) => UnitEvent::Message { index, message },
                    Err(error) => UnitEvent::Failed { index, error },
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        debug!(unit = %unit.label(), pool_size = self.units.len() + 1, "Unit ready");
        self.units.insert(
            0,
            UnitHandle {
                index,
                unit,
                active: 0,
            },
        );
        Ok(())
    }

    /// Send a batch to the head of the pool.
    fn assign(&mut self, batch: QueuedBatch) {
        let Some(head) = self.units.first_mut() else {
            batch.reply.send(Err(ParafmtError::PoolClosed)).ok();
            return;
        };

        let id = self.next_id;
        self.next_id += 1;
        let file_count = batch.files.len();

        if let Err(e) = head.unit.send(ControllerMessage::files(id, batch.files)) {
            batch.reply.send(Err(e.replay())).ok();
            self.fail(e);
            return;
        }

        head.active += 1;
        trace!(id, unit = %head.unit.label(), files = file_count, "Dispatched batch");
        self.pending.insert(
            id,
            PendingBatch {
                unit: head.index,
                reply: batch.reply,
            },
        );
        self.dispatched += 1;
        self.resort();
    }

    async fn handle_event(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Message { index, message } => {
                let id = message.id();
                let UnitMessage::Result(result) = message;
                match self.pending.remove(&id) {
                    Some(batch) if batch.unit == index => {
                        if let Some(handle) = self.units.iter_mut().find(|h| h.index == index) {
                            handle.active = handle.active.saturating_sub(1);
                        }
                        self.resort();
                        self.completed += 1;
                        batch.reply.send(Ok(result)).ok();
                        self.drain_queue().await;
                    }
                    Some(batch) => {
                        warn!(id, unit = index, "Discarding result from the wrong unit");
                        self.pending.insert(id, batch);
                    }
                    None => warn!(id, unit = index, "Discarding result for unknown batch"),
                }
            }
            UnitEvent::Failed { index, error } => {
                if self.fatal.is_none() {
                    error!(unit = index, error = %error, "Execution unit failed");
                }
                self.fail(error);
            }
        }
    }

    /// Record a fatal failure and fail every waiting caller.
    fn fail(&mut self, error: ParafmtError) {
        let error = self.fatal.get_or_insert(error);
        for (_, batch) in self.pending.drain() {
            batch.reply.send(Err(error.replay())).ok();
        }
        for batch in self.queue.drain(..) {
            batch.reply.send(Err(error.replay())).ok();
        }
        // Dropping a handle terminates its unit
        self.units.clear();
    }

    fn shutdown(&mut self) -> PoolStats {
        for (_, batch) in self.pending.drain() {
            batch.reply.send(Err(ParafmtError::PoolClosed)).ok();
        }
        for batch in self.queue.drain(..) {
            batch.reply.send(Err(ParafmtError::PoolClosed)).ok();
        }
        for handle in &mut self.units {
            handle.unit.terminate();
        }
        self.units.clear();

        let stats = PoolStats {
            units_spawned: self.spawned,
            batches_completed: self.completed,
        };
        debug!(
            units = stats.units_spawned,
            batches = stats.batches_completed,
            "Worker pool shut down"
        );
        stats
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            unit_loads: self.units.iter().map(|h| h.active).collect(),
            spawned: self.spawned,
            dispatched: self.dispatched,
            queued: self.queue.len(),
            next_id: self.next_id,
        }
    }

    fn resort(&mut self) {
        // Vec::sort_by_key is stable
        self.units.sort_by_key(|h| h.active);
    }
}
