//! In-flight job registry keyed by output path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{JobState, TaskId};

struct JobSlot {
    id: TaskId,
    started_at: Instant,
    state: Mutex<JobState>,
    settled: Condvar,
}

impl JobSlot {
    fn settle(&self, outcome: JobState) {
        *lock(&self.state) = outcome;
        self.settled.notify_all();
    }
}

type SlotMap = HashMap<PathBuf, Arc<JobSlot>>;

/// Tracks which keys currently have a job running.
#[derive(Clone, Default)]
pub struct JobRegistry {
    slots: Arc<Mutex<SlotMap>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a new job.
    ///
    /// Returns `None` when a job for the same key is already running.
    pub fn begin(&self, key: &Path) -> Option<JobTicket> {
        let mut slots = lock(&self.slots);
        if slots.contains_key(key) {
            return None;
        }

        let slot = Arc::new(JobSlot {
            id: TaskId::new(),
            started_at: Instant::now(),
            state: Mutex::new(JobState::Generating),
            settled: Condvar::new(),
        });
        slots.insert(key.to_path_buf(), slot.clone());

        Some(JobTicket {
            slots: self.slots.clone(),
            key: key.to_path_buf(),
            slot,
            finished: false,
        })
    }

    pub fn in_flight(&self, key: &Path) -> bool {
        lock(&self.slots).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Block until the job running for `key` settles or `timeout` elapses.
    ///
    /// Returns `None` if no job was running when called. On timeout the
    /// returned state is still `Generating`.
    pub fn wait(&self, key: &Path, timeout: Duration) -> Option<JobState> {
        let slot = lock(&self.slots).get(key).cloned()?;

        let state = lock(&slot.state);
        let (state, _) = slot
            .settled
            .wait_timeout_while(state, timeout, |s| !s.is_settled())
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(state.clone())
    }
}

/// Exclusive claim on a key, held by the job doing the work.
///
/// Finishing (or dropping) the ticket releases the key and wakes waiters.
pub struct JobTicket {
    slots: Arc<Mutex<SlotMap>>,
    key: PathBuf,
    slot: Arc<JobSlot>,
    finished: bool,
}

impl JobTicket {
    pub fn id(&self) -> TaskId {
        self.slot.id
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    pub fn elapsed(&self) -> Duration {
        self.slot.started_at.elapsed()
    }

    /// Record the outcome and release the key.
    pub fn finish(mut self, outcome: JobState) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: JobState) {
        if self.finished {
            return;
        }
        self.finished = true;
        lock(&self.slots).remove(&self.key);
        self.slot.settle(outcome);
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        // A panicking or abandoned job must not pin its key forever
        self.release(JobState::Failed("job abandoned".to_string()));
    }
}
