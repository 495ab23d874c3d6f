//! Domain types shared by every stage of a counting run.

use core::{fmt, time::Duration};

/// An entity listed by the catalog collaborator.
///
/// The engine never owns these; it reads the selected logical names and
/// writes results back through a [`ResultSink`](crate::ResultSink).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityTarget {
    /// Unique key of the entity in the remote system.
    pub logical_name: String,
    /// Localized label. May be empty when the remote has none.
    pub display_name: String,
    pub selected: bool,
}

impl EntityTarget {
    /// Creates an unselected entity.
    pub fn new(logical_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            display_name: display_name.into(),
            selected: false,
        }
    }

    /// Creates a selected entity whose label is its logical name.
    pub fn selected(logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            display_name: String::new(),
            selected: true,
        }
    }

    #[must_use]
    pub fn with_selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }

    /// Label to show for this entity, falling back to the logical name when
    /// no display name is known.
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.logical_name
        } else {
            &self.display_name
        }
    }
}

/// One count request, created per selected entity at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountRequestItem {
    pub logical_name: String,
}

impl CountRequestItem {
    pub fn new(logical_name: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
        }
    }
}

impl From<&EntityTarget> for CountRequestItem {
    fn from(target: &EntityTarget) -> Self {
        Self::new(target.logical_name.clone())
    }
}

/// An ordered group of requests submitted together in one remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch in the run, starting at 0.
    pub index: usize,
    pub items: Vec<CountRequestItem>,
}

impl Batch {
    pub const fn new(index: usize, items: Vec<CountRequestItem>) -> Self {
        Self { index, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `logical_name` was submitted in this batch (case-sensitive).
    pub fn contains(&self, logical_name: &str) -> bool {
        self.items.iter().any(|item| item.logical_name == logical_name)
    }
}

/// What the remote service answered for one submitted item, in submission
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResponse {
    /// The count succeeded. `entity` is the name the remote keyed the count
    /// by; it is expected to match the submitted logical name.
    Count { entity: String, count: u64 },
    /// The remote reported a per-item fault.
    Fault { message: String },
}

impl ItemResponse {
    pub fn count(entity: impl Into<String>, count: u64) -> Self {
        Self::Count {
            entity: entity.into(),
            count,
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }
}

/// Per-entity outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CountOutcome {
    Count(u64),
    /// The count is unavailable; carries the fault or transport message.
    Fault(String),
}

/// Exactly one of these is published per selected entity in a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountResult {
    pub logical_name: String,
    pub outcome: CountOutcome,
}

impl CountResult {
    pub fn success(logical_name: impl Into<String>, count: u64) -> Self {
        Self {
            logical_name: logical_name.into(),
            outcome: CountOutcome::Count(count),
        }
    }

    pub fn fault(logical_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            outcome: CountOutcome::Fault(message.into()),
        }
    }

    /// The record count, or `None` when the count is unavailable.
    pub fn count(&self) -> Option<u64> {
        match self.outcome {
            CountOutcome::Count(count) => Some(count),
            CountOutcome::Fault(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CountOutcome::Count(_) => None,
            CountOutcome::Fault(message) => Some(message),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self.outcome, CountOutcome::Fault(_))
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RunStatus {
    /// Every batch finished and every entity received a count.
    Completed,
    /// Every batch finished but at least one entity carries a fault.
    CompletedWithErrors,
    /// Cancellation stopped at least one batch from starting.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithErrors => write!(f, "completed with errors"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle of a [`CountEngine`](crate::CountEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Finished(RunStatus),
}

/// Statistics for one run. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub status: RunStatus,
    /// Wall-clock time from run start to the last published result.
    pub elapsed: Duration,
    /// Results delivered to the sink (successes and faults).
    pub published: usize,
    /// Published results carrying a fault.
    pub faulted: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    /// Batches never started because cancellation was requested.
    pub batches_skipped: usize,
    /// Responses discarded because they named an entity other than the one
    /// submitted at their position, had no submitted item, or repeated a
    /// published result.
    pub dropped: usize,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.published - self.faulted
    }
}
