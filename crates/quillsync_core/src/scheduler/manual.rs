//! Virtual-time scheduler.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{Scheduler, Task, TimerId, deadline_after};

/// A scheduler whose clock only moves when told to.
///
/// Tasks fire from [`advance`](ManualScheduler::advance) in deadline order;
/// timers sharing a deadline fire in the order they were scheduled. While a
/// task runs, [`now`](Scheduler::now) reports that task's deadline, and timers
/// it schedules are honored within the same advance if they fall due.
///
/// Cloning yields a handle onto the same clock.
#[derive(Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<State>>,
}

struct State {
    now: DateTime<Utc>,
    next_id: TimerId,
    queue: BTreeMap<(DateTime<Utc>, TimerId), Task>,
    deadlines: HashMap<TimerId, DateTime<Utc>>,
}

impl ManualScheduler {
    /// Create a virtual clock starting at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                now: start,
                next_id: 1,
                queue: BTreeMap::new(),
                deadlines: HashMap::new(),
            })),
        }
    }

    /// Create a virtual clock starting at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Move the clock forward by `by`, firing every timer that falls due.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = deadline_after(self.now(), by);
        self.advance_to(target)
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) -> usize {
        self.advance(Duration::from_millis(ms))
    }

    /// Move the clock to `target`, firing every timer due at or before it.
    ///
    /// The clock never moves backwards.
    pub fn advance_to(&self, target: DateTime<Utc>) -> usize {
        let mut fired = 0;
        while let Some(task) = self.pop_due(target) {
            // The lock is released: the task may schedule or cancel timers.
            task();
            fired += 1;
        }
        let mut state = self.lock();
        if target > state.now {
            state.now = target;
        }
        fired
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn pop_due(&self, target: DateTime<Utc>) -> Option<Task> {
        let mut state = self.lock();
        let key = *state.queue.keys().next()?;
        if key.0 > target {
            return None;
        }
        let task = state.queue.remove(&key)?;
        state.deadlines.remove(&key.1);
        if key.0 > state.now {
            state.now = key.0;
        }
        Some(task)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let deadline = deadline_after(state.now, delay);
        state.queue.insert((deadline, id), task);
        state.deadlines.insert(id, deadline);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let mut state = self.lock();
        match state.deadlines.remove(&id) {
            Some(deadline) => state.queue.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::at_epoch()
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}
