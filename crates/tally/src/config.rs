use crate::{Error, Result};
use core::time::Duration;

/// Default number of requests per multi-request call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default number of batches in flight at once.
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// Default limit on a single batch call before it is treated as a transport
/// failure.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Tuning parameters of a [`CountEngine`](crate::CountEngine).
///
/// Validated once when the engine is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of count requests per batch.
    pub batch_size: usize,
    /// Maximum number of concurrently executing batches (worker count).
    pub max_parallel: usize,
    /// Per-batch timeout. `None` waits indefinitely.
    pub batch_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_parallel: DEFAULT_MAX_PARALLEL,
            batch_timeout: Some(DEFAULT_BATCH_TIMEOUT),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    #[must_use]
    pub const fn with_batch_timeout(mut self, batch_timeout: Option<Duration>) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if any limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid("batch size must be greater than 0"));
        }
        if self.max_parallel == 0 {
            return Err(Error::invalid("max parallelism must be greater than 0"));
        }
        if self.batch_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid("batch timeout must be greater than 0"));
        }
        Ok(())
    }
}
