//! The counting engine: composition root of chunking, parallel execution and
//! result routing.
//!
//! A run moves through `Idle -> Running -> Finished(status)`:
//!
//! 1. The selection is validated (no empty names, no duplicates, at least one
//!    selected entity) before any network activity.
//! 2. Requests are chunked into [`Batch`]es of at most `batch_size` items.
//! 3. The [`WorkerPool`] executes up to `max_parallel` batches at once, each
//!    worker on its own connection.
//! 4. The engine drains batch reports on the calling task and routes every
//!    result through the [`Demultiplexer`], the only writer to the sink.
//!
//! Cancellation stops workers from taking new batches. Batches already in
//! flight drain and their results are still published; entities of batches
//! that never started receive no result.

#[cfg(test)]
mod tests;

use crate::{
    BatchProgress, ConnectionFactory, CountRequestItem, Demultiplexer, EngineConfig, EngineState,
    EntityTarget, Error, Result, ResultSink, RunObserver, RunStatus, RunSummary, chunk,
    demux::NO_RESULT,
    pool::{PoolRun, WorkerPool},
};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc, time::Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fault published for entities whose batch was lost without a report.
pub const WORKER_LOST: &str = "batch worker terminated before reporting";

/// Counts records for a selection of entities through a [`ConnectionFactory`].
///
/// One engine runs one counting run at a time; share it behind an [`Arc`] to
/// drive runs from a background task with [`spawn`](Self::spawn).
pub struct CountEngine<F: ConnectionFactory> {
    config: EngineConfig,
    pool: WorkerPool<F>,
    state: Mutex<EngineState>,
}

impl<F: ConnectionFactory> CountEngine<F> {
    /// Creates an engine over `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` is invalid.
    pub fn new(factory: F, config: EngineConfig) -> Result<Self> {
        Self::with_shared_factory(Arc::new(factory), config)
    }

    /// Like [`new`](Self::new), for a factory the caller keeps a handle to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` is invalid.
    pub fn with_shared_factory(factory: Arc<F>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(factory, config.max_parallel, config.batch_timeout);
        Ok(Self {
            config,
            pool,
            state: Mutex::new(EngineState::Idle),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &Arc<F> {
        self.pool.factory()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Counts every selected entity in `entities`, publishing exactly one
    /// result per entity to `sink` unless the run is cancelled.
    ///
    /// Per-item faults and whole-batch transport failures never abort the
    /// run; they are published as faults and reflected in the returned
    /// [`RunSummary::status`].
    ///
    /// # Errors
    ///
    /// - [`Error::NoSelection`] if no entity is selected.
    /// - [`Error::DuplicateEntity`] or [`Error::InvalidArgument`] for a
    ///   malformed selection.
    /// - [`Error::AlreadyRunning`] if another run on this engine is active.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "info",
            skip_all,
            fields(
                batch_size = self.config.batch_size,
                max_parallel = self.config.max_parallel,
            )
        )
    )]
    pub async fn run<'a, I, S, O>(
        &self,
        entities: I,
        sink: &mut S,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> Result<RunSummary>
    where
        I: IntoIterator<Item = &'a EntityTarget>,
        S: ResultSink + ?Sized,
        O: RunObserver + ?Sized,
    {
        let requests = selected_requests(entities)?;
        let mut demux = Demultiplexer::new(&requests);
        let entity_count = requests.len();
        let batches = chunk::batches(requests, self.config.batch_size)?;
        let batches_total = batches.len();

        let guard = RunGuard::begin(&self.state)?;
        let start = Instant::now();

        #[cfg(feature = "tracing")]
        tracing::info!(
            entities = entity_count,
            batches = batches_total,
            "Counting run started"
        );
        observer.run_started(entity_count, batches_total);

        // Workers stop taking batches if this future is dropped mid-run.
        let run_token = cancel.child_token();
        let _stop_workers = run_token.clone().drop_guard();

        let mut run = self.pool.dispatch(batches, run_token);
        let batches_completed = drain(&mut run, &mut demux, sink, observer, batches_total).await;
        let unstarted = run.finish().await;

        let cancelled = !unstarted.is_empty() && cancel.is_cancelled();
        let skipped: HashSet<&str> = if cancelled {
            #[cfg(feature = "tracing")]
            tracing::info!(
                skipped = unstarted.len(),
                "Run cancelled, remaining batches were not started"
            );
            unstarted
                .iter()
                .flat_map(|batch| batch.items.iter())
                .map(|item| item.logical_name.as_str())
                .collect()
        } else {
            HashSet::new()
        };
        demux.settle_pending(WORKER_LOST, sink, |name| !skipped.contains(name));

        let status = if cancelled {
            RunStatus::Cancelled
        } else if demux.faulted() > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        let summary = RunSummary {
            status,
            elapsed: start.elapsed(),
            published: demux.published(),
            faulted: demux.faulted(),
            batches_total,
            batches_completed,
            batches_skipped: if cancelled { unstarted.len() } else { 0 },
            dropped: demux.dropped(),
        };

        guard.finish(status);
        observer.run_finished(&summary);

        #[cfg(feature = "tracing")]
        tracing::info!(
            status = %summary.status,
            published = summary.published,
            faulted = summary.faulted,
            "Counting run finished in {:?}",
            summary.elapsed
        );

        Ok(summary)
    }

    /// Runs [`run`](Self::run) on a background task and returns a handle to
    /// await or cancel it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S, O>(
        self: &Arc<Self>,
        entities: Vec<EntityTarget>,
        mut sink: S,
        mut observer: O,
        cancel: CancellationToken,
    ) -> RunHandle
    where
        S: ResultSink + Send + 'static,
        O: RunObserver + Send + 'static,
    {
        let engine = Arc::clone(self);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            engine
                .run(&entities, &mut sink, &mut observer, token)
                .await
        });

        RunHandle { task, cancel }
    }
}

/// Handle to a run started with [`CountEngine::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    task: JoinHandle<Result<RunSummary>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Requests cancellation. Batches already in flight still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    ///
    /// Returns the run's own error, or [`Error::Channel`] if the background
    /// task panicked or was aborted.
    pub async fn join(self) -> Result<RunSummary> {
        self.task.await.map_err(|e| Error::Channel {
            context: format!("counting task terminated: {e}"),
        })?
    }
}

/// Publishes every report as it arrives. Returns how many batches reported.
async fn drain<S, O>(
    run: &mut PoolRun,
    demux: &mut Demultiplexer,
    sink: &mut S,
    observer: &mut O,
    total: usize,
) -> usize
where
    S: ResultSink + ?Sized,
    O: RunObserver + ?Sized,
{
    let mut completed = 0;

    while let Some(report) = run.next_report().await {
        completed += 1;
        let faulted_before = demux.faulted();

        demux.record_dropped(report.discarded);
        for result in report.results {
            demux.publish(result, sink);
        }
        demux.settle_batch(&report.batch, NO_RESULT, sink);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            batch = report.batch.index,
            worker = report.worker_id,
            "Batch {completed}/{total} finished in {:?}",
            report.elapsed
        );

        observer.batch_completed(&BatchProgress {
            index: report.batch.index,
            items: report.batch.len(),
            faulted: demux.faulted() - faulted_before,
            transport_failed: report.transport_error.is_some(),
            elapsed: report.elapsed,
            completed,
            total,
        });
    }

    completed
}

/// Extracts the selected entities as request items, in input order.
///
/// # Errors
///
/// Rejects blank or repeated logical names and an empty selection.
pub fn selected_requests<'a, I>(entities: I) -> Result<Vec<CountRequestItem>>
where
    I: IntoIterator<Item = &'a EntityTarget>,
{
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for entity in entities.into_iter().filter(|entity| entity.selected) {
        if entity.logical_name.trim().is_empty() {
            return Err(Error::invalid("entity logical name must not be empty"));
        }
        if !seen.insert(entity.logical_name.as_str()) {
            return Err(Error::DuplicateEntity {
                name: entity.logical_name.clone(),
            });
        }
        requests.push(CountRequestItem::from(entity));
    }

    if requests.is_empty() {
        return Err(Error::NoSelection);
    }
    Ok(requests)
}

/// Marks the engine as running for as long as it lives.
struct RunGuard<'a> {
    state: &'a Mutex<EngineState>,
    status: Option<RunStatus>,
}

impl<'a> RunGuard<'a> {
    fn begin(state: &'a Mutex<EngineState>) -> Result<Self> {
        let mut current = state.lock();
        if *current == EngineState::Running {
            return Err(Error::AlreadyRunning);
        }
        *current = EngineState::Running;
        Ok(Self {
            state,
            status: None,
        })
    }

    fn finish(mut self, status: RunStatus) {
        self.status = Some(status);
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        // An abandoned run leaves the engine reusable.
        *self.state.lock() = self.status.map_or(EngineState::Idle, EngineState::Finished);
    }
}
