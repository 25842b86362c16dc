//! Async learning task types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a queued learning task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generates a fresh random task ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("task-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue priority. FIFO holds within a priority; there is no ordering
/// guarantee across priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Default lane; oldest entries are dropped first under overflow.
    #[default]
    Normal,
    /// Preferred by workers; never dropped by the overflow policy.
    High,
}

/// Lifecycle state of a queued task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "detail")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker.
    Pending,
    /// Picked up by a worker.
    Running,
    /// Completed; carries a short summary (e.g. stored memory ids).
    Done(String),
    /// The task's work failed; carries the reason.
    Failed(String),
    /// Evicted by the bounded-queue drop policy before running.
    Dropped,
    /// Cancelled before it started. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done(_) | Self::Failed(_) | Self::Dropped | Self::Cancelled
        )
    }
}
