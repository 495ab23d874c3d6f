//! # tally
//!
//! Batched, bounded-parallel record counting across many remote entities.
//!
//! A run takes a selection of [`EntityTarget`]s, splits the selected ones
//! into [`Batch`]es, executes each batch as a single multi-request call on a
//! pool of workers (one connection per worker), and routes every per-item
//! result back to exactly one entity through a [`ResultSink`].
//!
//! ## Features
//!
//! - Order-preserving chunking with configurable batch size.
//! - Bounded parallelism with a configurable worker count.
//! - Clone-or-fallback connection leasing via [`ConnectionFactory`]; fallback
//!   calls on the shared connection are serialized.
//! - Per-item faults and whole-batch transport failures never abort a run.
//! - Cooperative cancellation through a [`CancellationToken`]: in-flight
//!   batches drain, no new batch starts.
//! - Optional `tracing` instrumentation and `serde` support behind cargo
//!   features.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tally::{CancellationToken, CountEngine, EngineConfig, EntityTarget};
//!
//! let engine = CountEngine::new(factory, EngineConfig::default())?;
//! let targets = vec![EntityTarget::selected("account"), EntityTarget::selected("contact")];
//! let mut results = Vec::new();
//!
//! let summary = engine
//!     .run(&targets, &mut results, &mut (), CancellationToken::new())
//!     .await?;
//! println!("{} counted in {:?}", summary.published, summary.elapsed);
//! ```

pub mod chunk;
mod config;
mod connection;
pub mod demux;
mod engine;
mod error;
pub mod executor;
pub mod pool;
mod sink;
mod types;

pub use crate::chunk::{batches, chunk};
pub use crate::config::*;
pub use crate::connection::{ConnectionFactory, CountConnection};
pub use crate::demux::{Delivery, Demultiplexer};
pub use crate::engine::*;
pub use crate::error::*;
pub use crate::executor::{BatchResults, execute_batch, fail_batch};
pub use crate::sink::*;
pub use crate::types::*;
pub use tokio_util::sync::CancellationToken;
