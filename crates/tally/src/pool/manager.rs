//! Worker pool construction and run handles.
//!
//! Each run gets its own set of workers, sized to the smaller of the
//! configured parallelism and the number of batches. Workers pull from a
//! shared FIFO queue, so a free worker always takes the next batch in order
//! and never sits idle while another worker is busy.

use super::worker::{WorkerContext, worker_loop};
use crate::{Batch, ConnectionFactory, CountResult, TransportError, connection::SharedGate};
use core::time::Duration;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Outcome of one executed batch, sent from a worker to the engine.
#[derive(Debug)]
pub struct BatchReport {
    pub worker_id: usize,
    /// The batch as submitted, handed back for settling.
    pub batch: Batch,
    /// One result per item. Items of a failed call carry the transport error.
    pub results: Vec<CountResult>,
    /// Responses that could not be attributed to their submitted item.
    pub discarded: usize,
    /// Set when the call as a whole failed.
    pub transport_error: Option<TransportError>,
    pub elapsed: Duration,
}

/// FIFO of batches not yet picked up by a worker.
#[derive(Debug, Default, Clone)]
pub(crate) struct BatchQueue(Arc<Mutex<VecDeque<Batch>>>);

impl BatchQueue {
    fn new(batches: Vec<Batch>) -> Self {
        Self(Arc::new(Mutex::new(VecDeque::from(batches))))
    }

    pub(crate) fn next_batch(&self) -> Option<Batch> {
        self.0.lock().pop_front()
    }

    fn drain(&self) -> Vec<Batch> {
        self.0.lock().drain(..).collect()
    }
}

/// Pool of connection-owning workers bound to one [`ConnectionFactory`].
pub struct WorkerPool<F: ConnectionFactory> {
    factory: Arc<F>,
    shared_gate: SharedGate,
    max_parallel: usize,
    batch_timeout: Option<Duration>,
}

impl<F: ConnectionFactory> WorkerPool<F> {
    pub fn new(factory: Arc<F>, max_parallel: usize, batch_timeout: Option<Duration>) -> Self {
        Self {
            factory,
            shared_gate: SharedGate::default(),
            max_parallel: max_parallel.max(1),
            batch_timeout,
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Spawns workers for `batches` and returns the handle to drain.
    ///
    /// Once `cancel` fires, workers finish the batch they hold and start no
    /// other. Must be called from within a Tokio runtime.
    pub fn dispatch(&self, batches: Vec<Batch>, cancel: CancellationToken) -> PoolRun {
        let num_workers = self.max_parallel.min(batches.len());
        let queue = BatchQueue::new(batches);
        let (report_tx, report_rx) = mpsc::channel(num_workers.max(1));

        let workers = (0..num_workers)
            .map(|worker_id| {
                let ctx = WorkerContext {
                    factory: Arc::clone(&self.factory),
                    shared_gate: Arc::clone(&self.shared_gate),
                    queue: queue.clone(),
                    reports: report_tx.clone(),
                    cancel: cancel.clone(),
                    batch_timeout: self.batch_timeout,
                };
                tokio::spawn(worker_loop(worker_id, ctx))
            })
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!("Spawned {num_workers} workers");

        PoolRun {
            reports: report_rx,
            queue,
            workers,
        }
    }
}

/// A dispatched run: a stream of [`BatchReport`]s plus the workers producing
/// them.
pub struct PoolRun {
    reports: mpsc::Receiver<BatchReport>,
    queue: BatchQueue,
    workers: Vec<JoinHandle<()>>,
}

impl PoolRun {
    /// Next finished batch, in completion order. `None` once every worker has
    /// exited.
    pub async fn next_report(&mut self) -> Option<BatchReport> {
        self.reports.recv().await
    }

    /// Waits for every worker to exit and returns the batches that were never
    /// started.
    pub async fn finish(self) -> Vec<Batch> {
        let Self {
            reports,
            queue,
            workers,
        } = self;
        drop(reports);

        for (_worker_id, joined) in futures::future::join_all(workers)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(_e) = joined {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker {_worker_id} terminated abnormally: {_e}");
            }
        }

        queue.drain()
    }
}
