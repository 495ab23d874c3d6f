use super::manager::{BatchQueue, BatchReport};
use crate::{
    Batch, BatchResults, ConnectionFactory, CountConnection, Error, TransportError,
    connection::{Lease, SharedGate},
    executor::{execute_batch, fail_batch},
};
use core::time::Duration;
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Everything a worker needs for one run.
pub(crate) struct WorkerContext<F: ConnectionFactory> {
    pub factory: Arc<F>,
    pub shared_gate: SharedGate,
    pub queue: BatchQueue,
    pub reports: mpsc::Sender<BatchReport>,
    pub cancel: CancellationToken,
    pub batch_timeout: Option<Duration>,
}

/// Worker task: executes batches one at a time until the queue is empty, the
/// run is cancelled, or the engine stops listening.
///
/// The connection is leased on the first batch and kept for the rest of the
/// run, so concurrent workers never share an owned connection.
pub(crate) async fn worker_loop<F: ConnectionFactory>(worker_id: usize, ctx: WorkerContext<F>) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    let mut lease: Option<Lease<F>> = None;

    loop {
        if ctx.cancel.is_cancelled() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker_id} observed cancellation");
            break;
        }

        let Some(batch) = ctx.queue.next_batch() else {
            break;
        };

        let connection = lease.get_or_insert_with(|| {
            let lease = Lease::acquire(&ctx.factory, &ctx.shared_gate);
            #[cfg(feature = "tracing")]
            if lease.is_shared() {
                tracing::warn!(
                    "Worker {worker_id} could not clone a connection; falling back to the shared connection"
                );
            } else {
                tracing::trace!("Worker {worker_id} leased an owned connection");
            }
            lease
        });

        let report = run_batch(worker_id, batch, &*connection, ctx.batch_timeout).await;

        if ctx.reports.send(report).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker_id} exiting, report receiver dropped");
            break;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

/// Executes one batch, downgrading a transport failure into one fault per
/// item so that every submitted item has a result.
async fn run_batch<C: CountConnection>(
    worker_id: usize,
    batch: Batch,
    connection: &C,
    timeout: Option<Duration>,
) -> BatchReport {
    let start = Instant::now();

    #[cfg(feature = "tracing")]
    tracing::debug!(
        batch = batch.index,
        items = batch.len(),
        "Worker {worker_id} executing batch"
    );

    let (mapped, transport_error) = match execute_batch(&batch, connection, timeout).await {
        Ok(mapped) => (mapped, None),
        Err(e) => {
            let source = match e {
                Error::BatchTransport { source, .. } => source,
                other => TransportError::Protocol(other.to_string()),
            };
            #[cfg(feature = "tracing")]
            tracing::warn!(batch = batch.index, "Batch call failed: {source}");
            let results = fail_batch(&batch, &source);
            (BatchResults { results, discarded: 0 }, Some(source))
        }
    };

    BatchReport {
        worker_id,
        batch,
        results: mapped.results,
        discarded: mapped.discarded,
        transport_error,
        elapsed: start.elapsed(),
    }
}
