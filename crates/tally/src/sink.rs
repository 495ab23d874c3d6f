//! Outbound collaborators: where results and progress go.

use crate::{CountResult, RunSummary};
use core::time::Duration;
use tokio::sync::mpsc;

/// Receives exactly one result per selected entity.
///
/// All calls happen on the task driving the run, never from worker tasks,
/// so implementations may own display state without synchronization.
pub trait ResultSink {
    fn on_result(&mut self, result: &CountResult);
}

impl<F> ResultSink for F
where
    F: FnMut(&CountResult),
{
    fn on_result(&mut self, result: &CountResult) {
        self(result);
    }
}

impl ResultSink for Vec<CountResult> {
    fn on_result(&mut self, result: &CountResult) {
        self.push(result.clone());
    }
}

/// Forwards results to another task. Results published after the receiver
/// is gone are discarded.
impl ResultSink for mpsc::UnboundedSender<CountResult> {
    fn on_result(&mut self, result: &CountResult) {
        if self.send(result.clone()).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(entity = %result.logical_name, "Result receiver dropped");
        }
    }
}

/// Progress of one finished batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    pub index: usize,
    pub items: usize,
    pub faulted: usize,
    /// Whether the whole call failed and every item was marked as faulted.
    pub transport_failed: bool,
    pub elapsed: Duration,
    /// Batches finished so far in this run, including this one.
    pub completed: usize,
    pub total: usize,
}

/// Run lifecycle notifications. Every method defaults to a no-op.
pub trait RunObserver {
    fn run_started(&mut self, _entities: usize, _batches: usize) {}

    fn batch_completed(&mut self, _progress: &BatchProgress) {}

    fn run_finished(&mut self, _summary: &RunSummary) {}
}

impl RunObserver for () {}
