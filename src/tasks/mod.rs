//! Background job tracking for work that must not block a request.
//!
//! Jobs are keyed by the file they produce. At most one job per key is in
//! flight; later requests for the same key observe or wait on that job
//! instead of starting another one.

pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};

pub use registry::{JobRegistry, JobTicket};

/// Unique identifier for a background job, used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl TaskId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TaskId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a generated artifact.
///
/// `Absent` and `Ready` are derived from the filesystem on every query.
/// `Generating` and `Failed` only exist while a job is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Absent,
    Generating,
    Ready,
    Failed(String),
}

impl JobState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, JobState::Generating)
    }
}
