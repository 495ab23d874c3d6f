//! Routing of per-item results back onto the originating entities.
//!
//! The [`Demultiplexer`] is the single writer to the result sink. It knows the
//! full request set of a run and guarantees that each requested entity is
//! published at most once; [`settle_batch`](Demultiplexer::settle_batch) and
//! [`settle_pending`](Demultiplexer::settle_pending) close the gap to exactly
//! once by publishing faults for entities that would otherwise get nothing.

use crate::{Batch, CountRequestItem, CountResult, ResultSink};
use std::collections::HashSet;

/// Fault published for a submitted entity whose batch reported no usable
/// result for it.
pub const NO_RESULT: &str = "no result returned for entity";

/// What happened to a result handed to [`Demultiplexer::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The entity was never requested in this run. Dropped.
    Unknown,
    /// The entity already received its result. Dropped.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Demultiplexer {
    requested: HashSet<String>,
    pending: HashSet<String>,
    published: usize,
    faulted: usize,
    dropped: usize,
}

impl Demultiplexer {
    pub fn new<'a, I>(requests: I) -> Self
    where
        I: IntoIterator<Item = &'a CountRequestItem>,
    {
        let requested: HashSet<String> = requests
            .into_iter()
            .map(|item| item.logical_name.clone())
            .collect();

        Self {
            pending: requested.clone(),
            requested,
            ..Self::default()
        }
    }

    /// Forwards `result` to `sink` if its entity was requested and has not
    /// been published yet. Lookup is exact and case-sensitive.
    pub fn publish<S>(&mut self, result: CountResult, sink: &mut S) -> Delivery
    where
        S: ResultSink + ?Sized,
    {
        if !self.requested.contains(&result.logical_name) {
            self.dropped += 1;
            #[cfg(feature = "tracing")]
            tracing::warn!(
                entity = %result.logical_name,
                "Dropping result for an entity that was not requested"
            );
            return Delivery::Unknown;
        }

        if !self.pending.remove(&result.logical_name) {
            self.dropped += 1;
            #[cfg(feature = "tracing")]
            tracing::warn!(
                entity = %result.logical_name,
                "Dropping repeated result for an entity that already has one"
            );
            return Delivery::Duplicate;
        }

        if result.is_fault() {
            self.faulted += 1;
        }
        self.published += 1;
        sink.on_result(&result);

        Delivery::Delivered
    }

    /// Publishes a `message` fault for every item of `batch` still awaiting a
    /// result. Returns how many were published.
    pub fn settle_batch<S>(&mut self, batch: &Batch, message: &str, sink: &mut S) -> usize
    where
        S: ResultSink + ?Sized,
    {
        let owed: Vec<String> = batch
            .items
            .iter()
            .filter(|item| self.pending.contains(&item.logical_name))
            .map(|item| item.logical_name.clone())
            .collect();

        self.settle(owed, message, sink)
    }

    /// Publishes a `message` fault for every pending entity accepted by
    /// `filter`, in name order. Returns how many were published.
    pub fn settle_pending<S, P>(&mut self, message: &str, sink: &mut S, filter: P) -> usize
    where
        S: ResultSink + ?Sized,
        P: Fn(&str) -> bool,
    {
        let mut owed: Vec<String> = self
            .pending
            .iter()
            .filter(|name| filter(name))
            .cloned()
            .collect();
        owed.sort_unstable();

        self.settle(owed, message, sink)
    }

    fn settle<S>(&mut self, owed: Vec<String>, message: &str, sink: &mut S) -> usize
    where
        S: ResultSink + ?Sized,
    {
        let settled = owed.len();
        for name in owed {
            #[cfg(feature = "tracing")]
            tracing::warn!(entity = %name, reason = message, "Publishing fault for entity without a result");
            self.publish(CountResult::fault(name, message), sink);
        }
        settled
    }

    pub fn published(&self) -> usize {
        self.published
    }

    pub fn faulted(&self) -> usize {
        self.faulted
    }

    /// Counts responses discarded before they reached the demultiplexer.
    pub fn record_dropped(&mut self, count: usize) {
        self.dropped += count;
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Entities still awaiting a result.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
