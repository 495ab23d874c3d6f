//! Remote connection capabilities.
//!
//! The engine never talks to a transport directly. It asks a
//! [`ConnectionFactory`] for an independent [`CountConnection`] per worker and
//! falls back to the factory's shared connection when cloning is not
//! possible. Fallback callers are serialized through a [`SharedGate`] since the
//! shared connection is not assumed to be safe for concurrent use.

use crate::{CountRequestItem, ItemResponse, TransportError};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A connection able to submit several count requests in one call.
///
/// Implementations must run in continue-on-error mode and return exactly one
/// [`ItemResponse`] per submitted item, in submission order. A failure of the
/// call as a whole is reported as a [`TransportError`].
pub trait CountConnection: Send + Sync + 'static {
    fn execute_multiple(
        &self,
        items: &[CountRequestItem],
    ) -> impl Future<Output = Result<Vec<ItemResponse>, TransportError>> + Send;
}

/// Source of connections for the worker pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: CountConnection;

    /// Attempts to create an independent connection. `None` means cloning
    /// failed and the caller should use [`shared`](Self::shared) instead.
    fn try_clone(&self) -> Option<Self::Connection>;

    /// The default connection every fallback caller shares.
    fn shared(&self) -> &Self::Connection;
}

/// Serializes calls made through the shared fallback connection.
pub(crate) type SharedGate = Arc<Mutex<()>>;

/// Connection held by one worker for the lifetime of a run.
pub(crate) enum Lease<F: ConnectionFactory> {
    /// Exclusively owned by the worker.
    Owned(F::Connection),
    /// Borrowed from the factory; one caller at a time.
    Shared { factory: Arc<F>, gate: SharedGate },
}

impl<F: ConnectionFactory> Lease<F> {
    /// Clones a connection from `factory`, falling back to the shared one.
    pub(crate) fn acquire(factory: &Arc<F>, gate: &SharedGate) -> Self {
        match factory.try_clone() {
            Some(connection) => Self::Owned(connection),
            None => Self::Shared {
                factory: Arc::clone(factory),
                gate: Arc::clone(gate),
            },
        }
    }

    #[cfg_attr(not(any(test, feature = "tracing")), allow(dead_code))]
    pub(crate) const fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

impl<F: ConnectionFactory> CountConnection for Lease<F> {
    async fn execute_multiple(
        &self,
        items: &[CountRequestItem],
    ) -> Result<Vec<ItemResponse>, TransportError> {
        match self {
            Self::Owned(connection) => connection.execute_multiple(items).await,
            Self::Shared { factory, gate } => {
                let _guard = gate.lock().await;
                factory.shared().execute_multiple(items).await
            }
        }
    }
}
