//! Timer abstraction.
//!
//! Debounced pushes, heartbeat expiry, and liveness refreshes are all one-shot
//! timers. The sync core asks a [`Scheduler`] for them instead of sleeping, so
//! the host decides how time passes: an event loop in production, the
//! [`ManualScheduler`] virtual clock in tests and simulations.

mod manual;

pub use manual::ManualScheduler;

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identifier of a scheduled timer.
pub type TimerId = u64;

/// A one-shot task run when its timer fires.
pub type Task = Box<dyn FnOnce() + Send>;

/// Trait for one-shot timer services.
pub trait Scheduler: Send + Sync {
    /// Current time as seen by this scheduler.
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timer.
    ///
    /// Returns `false` if the timer already fired or was already cancelled.
    fn cancel(&self, id: TimerId) -> bool;
}

/// Deadline for a timer started at `now`, saturating at the end of time.
pub fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Milliseconds elapsed from `earlier` to `later` (negative if `later` is before).
pub fn millis_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_milliseconds()
}
