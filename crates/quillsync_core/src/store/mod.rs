//! Realtime store abstraction.
//!
//! The sync core never talks to a concrete backend. It depends on the
//! [`RealtimeStore`] capability: a JSON tree addressed by `/`-separated paths
//! that supports full overwrite, one-level merge, delete, and change
//! subscriptions. [`MemoryStore`] is the in-process implementation used by
//! tests and the CLI simulator.
//!
//! # Subscription Model
//!
//! ```text
//! subscribe("editor", cb) ──► cb(current value)      (immediately)
//! write("editor", v)      ──► cb(v)                   (every change)
//! sub.unsubscribe()       ──► cb never fires again    (idempotent)
//! ```

mod memory;

pub use memory::MemoryStore;

use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::callback_registry::SubscriptionId;
use crate::error::{QuillsyncError, Result};

/// Result type for store operations.
pub type StoreResult<T> = Result<T>;

/// The value observed at a path when a subscription fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Normalized path the subscription is attached to.
    pub path: String,
    /// Current value, or `None` when nothing is stored there.
    pub value: Option<Value>,
}

impl Snapshot {
    /// Create a snapshot for a path.
    pub fn new(path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Callback invoked with every snapshot delivered to a subscription.
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Trait for realtime key-value stores.
///
/// All writes are unconditional: there is no version check, so concurrent
/// writers race and the last one wins.
pub trait RealtimeStore: Send + Sync {
    /// Read the current value at `path` once.
    fn read(&self, path: &str) -> StoreResult<Option<Value>>;

    /// Replace the value at `path` (and everything below it).
    fn write(&self, path: &str, value: Value) -> StoreResult<()>;

    /// Merge `partial` into the object at `path`, one level deep.
    ///
    /// Keys present in `partial` replace the corresponding children; other
    /// children are left untouched. A `null` child deletes that key.
    fn patch(&self, path: &str, partial: Map<String, Value>) -> StoreResult<()>;

    /// Remove the value at `path`.
    fn delete(&self, path: &str) -> StoreResult<()>;

    /// Subscribe to the value at `path`.
    ///
    /// The callback is invoked once immediately with the current value and
    /// again after every change. Drop or [`Subscription::unsubscribe`] the
    /// returned handle to stop receiving notifications.
    fn subscribe(&self, path: &str, callback: SnapshotCallback) -> StoreResult<Subscription>;
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle for a live subscription.
///
/// Unsubscribing is idempotent, and dropping the handle unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    /// Create a handle that runs `cancel` on the first unsubscribe.
    pub fn new(id: SubscriptionId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Stop receiving notifications.
    ///
    /// Returns `true` the first time; later calls are no-ops returning `false`.
    pub fn unsubscribe(&self) -> bool {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match cancel {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    /// Whether this handle is still subscribed.
    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Split a path into its segments.
///
/// Leading and trailing slashes are ignored; the empty path addresses the
/// root. Empty inner segments (`a//b`) are rejected.
pub fn path_segments(path: &str) -> StoreResult<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(QuillsyncError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Normalize a path to its canonical `a/b/c` form.
pub fn normalize_path(path: &str) -> StoreResult<String> {
    Ok(path_segments(path)?.join("/"))
}

/// Join a child key onto a parent path.
pub fn child_path(parent: &str, key: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", parent, key)
    }
}

/// Whether `a` and `b` overlap, i.e. one is an ancestor of (or equal to) the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    is_ancestor_or_self(a, b) || is_ancestor_or_self(b, a)
}

fn is_ancestor_or_self(ancestor: &str, path: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("/editor/activity/").unwrap(), vec!["editor", "activity"]);
        assert!(path_segments("").unwrap().is_empty());
        assert!(path_segments("a//b").is_err());
    }

    #[test]
    fn test_paths_overlap() {
        assert!(paths_overlap("editor", "editor"));
        assert!(paths_overlap("editor", "editor/activity"));
        assert!(paths_overlap("editor/activity", "editor"));
        assert!(paths_overlap("", "anything"));
        assert!(!paths_overlap("editor", "editorial"));
        assert!(!paths_overlap("editor", "activity"));
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("activity", "alice"), "activity/alice");
        assert_eq!(child_path("", "alice"), "alice");
    }

    #[test]
    fn test_subscription_unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let sub = Subscription::new(7, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        {
            let _sub = Subscription::new(1, move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
