//! Error types for the counting engine.
//!
//! Two layers of failure exist:
//!
//! - [`Error`] is what the engine surfaces to its caller. Only validation
//!   failures (before any network activity) and internal plumbing faults are
//!   ever returned from a run; per-item and per-batch failures are carried as
//!   data on each entity's [`CountResult`](crate::CountResult).
//! - [`TransportError`] is what a [`CountConnection`](crate::CountConnection)
//!   reports when an entire multi-request call fails (connectivity, auth,
//!   serialization, timeout). The executor wraps it in
//!   [`Error::BatchTransport`] and the worker pool downgrades it into one
//!   fault per item of the batch.

use core::time::Duration;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the counting engine.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// A caller-supplied parameter was malformed (e.g. a zero chunk size).
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A run was requested with no selected entities.
    #[error("No entities selected. Select at least one entity to count")]
    NoSelection,

    /// The same logical name appeared more than once in a selection.
    #[error("Invalid argument: entity `{name}` is selected more than once")]
    DuplicateEntity { name: String },

    /// The engine is already executing a run.
    #[error("A counting run is already in progress")]
    AlreadyRunning,

    /// An entire batch call failed outside the remote per-item fault channel.
    #[error("Batch {batch} failed: {source}")]
    BatchTransport {
        batch: usize,
        #[source]
        source: TransportError,
    },

    /// Internal channel send/receive failure between the pool and the engine.
    #[error("Channel error: {context}")]
    Channel { context: String },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Failure of a whole multi-request call.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("Request failed: {0}")]
    Request(String),

    /// The remote service rejected the call as a whole.
    #[error("Remote service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The call did not complete within the configured batch timeout.
    #[error("Batch timed out after {0:?}")]
    Timeout(Duration),
}
