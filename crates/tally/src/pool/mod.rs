//! Bounded worker pool that executes batches concurrently.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`] spawns one task per parallel slot and hands
//!   out the batch queue; [`PoolRun`] is the handle the engine drains.
//! - [`worker`] - the per-worker loop: lease a connection, pull a batch,
//!   execute it, report it, repeat until the queue is empty or the run is
//!   cancelled.
//!
//! Workers never share mutable state beyond the batch queue. Results travel
//! back to the engine over a bounded channel as [`BatchReport`]s and are
//! published by a single consumer.

pub mod manager;
pub mod worker;

pub use manager::{BatchReport, PoolRun, WorkerPool};
