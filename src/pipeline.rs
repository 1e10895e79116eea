//! Batching and backpressure between discovery and the pool.
//!
//! Files are pulled from the discovery stream in fixed-size groups and handed
//! to a [`BatchDispatcher`]. A semaphore caps the number of groups awaiting a
//! result, so memory stays bounded no matter how many files are discovered.

use crate::error::{ParafmtError, Result};
use crate::worker::{FileDescriptor, FormatResult, WorkerPool};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Default number of files per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Something that formats a batch of files.
pub trait BatchDispatcher: Send + Sync {
    fn format(
        &self,
        files: Vec<FileDescriptor>,
    ) -> impl Future<Output = Result<FormatResult>> + Send;
}

impl BatchDispatcher for WorkerPool {
    fn format(
        &self,
        files: Vec<FileDescriptor>,
    ) -> impl Future<Output = Result<FormatResult>> + Send {
        WorkerPool::format(self, files)
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Files per batch; the final batch may be smaller.
    pub batch_size: usize,
    /// Maximum batches awaiting a result at once.
    pub max_in_flight: usize,
}

impl PipelineConfig {
    /// Configuration for a pool of `concurrency` units: `2 × concurrency`
    /// batches in flight.
    pub fn for_concurrency(concurrency: usize, batch_size: usize) -> Self {
        Self {
            batch_size,
            max_in_flight: concurrency.saturating_mul(2),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ParafmtError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ParafmtError::InvalidConfig(
                "in-flight limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pull up to `size` files from the stream.
async fn next_batch<S>(files: &mut S, size: usize) -> Result<Option<Vec<FileDescriptor>>>
where
    S: Stream<Item = Result<FileDescriptor>> + Unpin,
{
    let mut batch = Vec::with_capacity(size);
    while batch.len() < size {
        match files.next().await {
            Some(file) => batch.push(file?),
            None => break,
        }
    }
    Ok((!batch.is_empty()).then_some(batch))
}

/// Drive every discovered file through the dispatcher.
///
/// Results are passed to `on_result` in arrival order. The first discovery
/// or dispatch error ends the run; batches still in flight are abandoned.
/// Returns the number of batches completed.
pub async fn run_pipeline<D, S, F>(
    dispatcher: &D,
    files: S,
    config: PipelineConfig,
    mut on_result: F,
) -> Result<usize>
where
    D: BatchDispatcher,
    S: Stream<Item = Result<FileDescriptor>>,
    F: FnMut(FormatResult),
{
    config.validate()?;

    let mut files = std::pin::pin!(files.fuse());
    let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
    let mut in_flight = FuturesUnordered::new();
    let mut exhausted = false;
    let mut submitted = 0usize;
    let mut completed = 0usize;

    loop {
        if exhausted && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                let result: FormatResult = result?;
                completed += 1;
                trace!(id = result.id, in_flight = in_flight.len(), "Batch finished");
                on_result(result);
            }

            permit = Arc::clone(&semaphore).acquire_owned(), if !exhausted => {
                let permit = permit.map_err(|_| ParafmtError::PoolClosed)?;
                match next_batch(&mut files, config.batch_size).await? {
                    Some(batch) => {
                        submitted += 1;
                        trace!(files = batch.len(), in_flight = in_flight.len() + 1, "Submitting batch");
                        in_flight.push(async move {
                            let _permit = permit;
                            dispatcher.format(batch).await
                        });
                    }
                    None => exhausted = true,
                }
            }
        }
    }

    debug!(batches = submitted, "Pipeline drained");
    Ok(completed)
}
