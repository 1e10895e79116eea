//! Worker-side runner.
//!
//! Runs inside every execution unit. The same loop serves both backends: a
//! thread unit drives it over in-process channels, a process unit drives it
//! from `parafmt --internal-worker` over the socket on its stdin.

use super::ipc::{LineReader, LineWriter};
use super::protocol::{ControllerMessage, FileDescriptor, FormatResult, Mode, UnitMessage, WorkUnit};
use crate::error::{FormatError, ParafmtError, Result};
use crate::format::{Formatter, TextFormatter, options};
use std::io::{self, Write};
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Destination of `Print` mode output.
#[derive(Clone)]
pub struct PrintSink(Arc<Mutex<Box<dyn Write + Send>>>);

impl PrintSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// The process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    fn emit(&self, content: &str) -> io::Result<()> {
        let mut writer = self
            .0
            .lock()
            .map_err(|_| io::Error::other("print sink poisoned"))?;
        writer.write_all(content.as_bytes())?;
        writer.flush()
    }
}

/// Everything a unit needs to format files.
#[derive(Clone)]
pub struct RunnerContext {
    pub formatter: Arc<dyn Formatter>,
    pub output: PrintSink,
}

impl Default for RunnerContext {
    fn default() -> Self {
        Self {
            formatter: Arc::new(TextFormatter),
            output: PrintSink::stdout(),
        }
    }
}

/// Outcome for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Unchanged,
    Formatted,
    Failed,
}

/// Format one file and apply the mode's side effect.
async fn format_file(
    context: &RunnerContext,
    mode: Mode,
    file: &FileDescriptor,
) -> std::result::Result<bool, FormatError> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(|source| FormatError::Read {
            path: file.path.clone(),
            source,
        })?;
    let source = String::from_utf8(bytes).map_err(|e| FormatError::Read {
        path: file.path.clone(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    let options = options::resolve(&file.path).await?;
    let formatted = context.formatter.format(&source, &file.path, &options)?;
    if formatted == source {
        return Ok(false);
    }

    match mode {
        Mode::Write => tokio::fs::write(&file.path, formatted.as_bytes())
            .await
            .map_err(|source| FormatError::Write {
                path: file.path.clone(),
                source,
            })?,
        Mode::Print => context
            .output
            .emit(&formatted)
            .map_err(|source| FormatError::Write {
                path: file.path.clone(),
                source,
            })?,
        Mode::Assert => {}
    }
    Ok(true)
}

async fn attempt(context: &RunnerContext, mode: Mode, file: &FileDescriptor) -> FileOutcome {
    match format_file(context, mode, file).await {
        Ok(true) => FileOutcome::Formatted,
        Ok(false) => FileOutcome::Unchanged,
        Err(e) => {
            warn!(path = %file.path.display(), error = %e, "Failed to format file");
            FileOutcome::Failed
        }
    }
}

/// Format every file of a work unit and build its result.
///
/// Files are attempted concurrently; a failing file never stops the batch.
pub async fn format_batch(context: &RunnerContext, mode: Mode, unit: WorkUnit) -> FormatResult {
    let outcomes =
        futures::future::join_all(unit.files.iter().map(|file| attempt(context, mode, file)))
            .await;

    let mut result = FormatResult::empty(unit.id, unit.files.len());
    for (file, outcome) in unit.files.into_iter().zip(outcomes) {
        match outcome {
            FileOutcome::Formatted => result.formatted.push(file),
            FileOutcome::Failed => result.failed.push(file),
            FileOutcome::Unchanged => {}
        }
    }
    result
}

/// Unit main loop.
///
/// Remembers the latest `Init`, formats each `Files` batch and answers with
/// one `Result`. Returns when the controller closes the inbound channel.
pub async fn run_unit(
    mut inbound: mpsc::UnboundedReceiver<ControllerMessage>,
    outbound: mpsc::UnboundedSender<UnitMessage>,
    context: RunnerContext,
) -> Result<()> {
    let mut mode: Option<Mode> = None;

    while let Some(message) = inbound.recv().await {
        match message {
            ControllerMessage::Init { mode: m } => {
                debug!(mode = ?m, "Unit initialized");
                mode = Some(m);
            }
            ControllerMessage::Files(unit) => {
                let mode = mode.ok_or_else(|| {
                    ParafmtError::Protocol(format!("received batch {} before Init", unit.id))
                })?;
                let id = unit.id;
                let result = format_batch(&context, mode, unit).await;
                debug!(
                    id,
                    total = result.total,
                    formatted = result.formatted.len(),
                    failed = result.failed.len(),
                    "Batch complete"
                );
                if outbound.send(UnitMessage::Result(result)).is_err() {
                    // Controller is gone, nobody to report to
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Bridge the stdin socket to [`run_unit`].
async fn serve_socket(context: RunnerContext) -> Result<()> {
    // Safety: fd 0 is the socket installed by the controller and is owned by
    // nothing else in this process.
    let fd = unsafe { OwnedFd::from_raw_fd(0) };
    let std_stream = std::os::unix::net::UnixStream::from(fd);
    std_stream.set_nonblocking(true)?;
    let stream = tokio::net::UnixStream::from_std(std_stream)?;
    serve_stream(stream, context).await
}

/// Speak the envelope protocol over `stream` until the controller hangs up.
///
/// A malformed envelope or a read failure is an error even though it also
/// ends the inbound side.
async fn serve_stream(stream: tokio::net::UnixStream, context: RunnerContext) -> Result<()> {
    let (read_half, write_half) = stream.into_split();

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<UnitMessage>();

    let reader = tokio::spawn(async move {
        let mut reader = LineReader::new(read_half);
        while let Some(line) = reader.read_line().await? {
            let message = ControllerMessage::from_line(line)
                .map_err(|e| ParafmtError::Protocol(format!("invalid envelope: {}", e)))?;
            if in_tx.send(message).is_err() {
                break;
            }
        }
        Ok::<(), ParafmtError>(())
    });

    let writer = tokio::spawn(async move {
        let mut writer = LineWriter::new(write_half);
        while let Some(message) = out_rx.recv().await {
            writer.write_line(&message.to_line()?).await?;
        }
        writer.shutdown().await?;
        Ok::<(), ParafmtError>(())
    });

    let run = run_unit(in_rx, out_tx, context).await;
    // The runner dropped its sender, so the writer drains and finishes.
    let written = writer
        .await
        .map_err(|e| ParafmtError::Protocol(format!("writer task failed: {}", e)))?;
    if run.is_err() || written.is_err() {
        reader.abort();
        run?;
        return written;
    }

    // The runner only ends cleanly once the reader has stopped
    reader
        .await
        .map_err(|e| ParafmtError::Protocol(format!("reader task failed: {}", e)))?
}

/// Run the worker process main function.
///
/// Never returns: exits 0 when the controller closes the connection, non-zero
/// on a protocol or transport failure.
pub fn run_worker_main() -> ! {
    // Ignore SIGPIPE - a vanished controller shows up as an io::Error
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Worker error: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(serve_socket(RunnerContext::default())) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "Worker exiting");
            std::process::exit(2);
        }
    }
}
