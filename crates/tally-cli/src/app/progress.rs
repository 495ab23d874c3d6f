use tally::{BatchProgress, RunObserver, RunStatus, RunSummary};

/// Logs run progress at `info`.
#[derive(Debug, Default)]
pub struct LogProgress;

impl RunObserver for LogProgress {
    fn run_started(&mut self, entities: usize, batches: usize) {
        tracing::info!("Counting {entities} entities in {batches} batches");
    }

    fn batch_completed(&mut self, progress: &BatchProgress) {
        if progress.transport_failed {
            tracing::warn!(
                batch = progress.index,
                "Batch {}/{} failed as a whole ({} entities)",
                progress.completed,
                progress.total,
                progress.items
            );
        } else {
            tracing::info!(
                batch = progress.index,
                faulted = progress.faulted,
                "Batch {}/{} done in {:?}",
                progress.completed,
                progress.total,
                progress.elapsed
            );
        }
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        match summary.status {
            RunStatus::Completed => tracing::info!(
                "Counted {} entities in {:?}",
                summary.published,
                summary.elapsed
            ),
            RunStatus::CompletedWithErrors => tracing::warn!(
                "Counted {} of {} entities in {:?}; {} failed",
                summary.succeeded(),
                summary.published,
                summary.elapsed,
                summary.faulted
            ),
            RunStatus::Cancelled => tracing::warn!(
                "Cancelled after {:?}; {} batches not started",
                summary.elapsed,
                summary.batches_skipped
            ),
        }
    }
}
