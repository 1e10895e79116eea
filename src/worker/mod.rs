//! Execution units and the pool that dispatches batches to them.
//!
//! Architecture:
//! - **Pool**: a dispatcher task that spawns units lazily, routes each batch
//!   to the least-loaded unit and matches results by batch id.
//! - **Units**: isolated workers, either child processes (`--internal-worker`)
//!   or dedicated threads, behind one [`UnitLauncher`] interface.
//! - **Protocol**: JSON-lines envelopes (`Init`, `Files`, `Result`).
//!
//! A unit that exits or breaks the protocol while the pool is in use is
//! fatal; the pool never respawns.

pub mod ipc;
pub mod pool;
pub mod proc;
pub mod protocol;
pub mod signals;
pub mod thread;
pub mod unit;
pub mod worker_main;

pub use pool::{PoolConfig, PoolSnapshot, PoolStats, WorkerPool};
pub use proc::ProcessLauncher;
pub use protocol::{ControllerMessage, FileDescriptor, FormatResult, Mode, UnitMessage, WorkUnit};
pub use thread::ThreadLauncher;
pub use unit::{ChannelBacking, ExecutionUnit, Isolation, UnitBacking, UnitLauncher, UnitMessages};
pub use worker_main::{PrintSink, RunnerContext, run_worker_main};
