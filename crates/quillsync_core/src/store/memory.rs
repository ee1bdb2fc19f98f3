//! In-memory realtime store.
//!
//! This provides an in-process implementation of [`RealtimeStore`] with the
//! notification semantics of a hosted realtime database: a change at one path
//! is visible to subscribers on that path, on its ancestors, and on its
//! descendants, and a subscriber only hears about it when the value at its own
//! path actually changed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde_json::{Map, Value};

use super::{
    RealtimeStore, Snapshot, SnapshotCallback, StoreResult, Subscription, normalize_path,
    paths_overlap,
};
use crate::callback_registry::SubscriptionId;
use crate::error::QuillsyncError;

/// In-memory realtime store.
///
/// Cloning is cheap and yields a handle onto the same tree, so several
/// sessions can share one store the way several browsers share one database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: RwLock<Value>,
    watches: RwLock<HashMap<SubscriptionId, Watch>>,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            root: RwLock::new(Value::Null),
            watches: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }
}

struct Watch {
    path: String,
    callback: SnapshotCallback,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going offline (or coming back).
    ///
    /// While unavailable every operation fails with
    /// [`QuillsyncError::StoreUnavailable`]. Existing subscriptions stay
    /// registered and resume hearing changes once the store is back.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether the store currently accepts operations.
    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .watches
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Export the whole tree (for debugging and the CLI).
    pub fn dump(&self) -> Value {
        self.inner
            .root
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(QuillsyncError::StoreUnavailable(
                "memory store is offline".to_string(),
            ))
        }
    }

    /// Apply `op` to the tree and notify every subscriber whose value changed.
    fn mutate(&self, path: &str, op: impl FnOnce(&mut Value)) -> StoreResult<()> {
        self.ensure_available()?;
        let path = normalize_path(path)?;

        let affected: Vec<(SubscriptionId, String)> = {
            let watches = self.inner.watches.read().unwrap_or_else(|e| e.into_inner());
            watches
                .iter()
                .filter(|(_, watch)| paths_overlap(&watch.path, &path))
                .map(|(id, watch)| (*id, watch.path.clone()))
                .collect()
        };

        let changed: Vec<(SubscriptionId, Snapshot)> = {
            let mut root = self.inner.root.write().unwrap_or_else(|e| e.into_inner());
            let before: Vec<Option<Value>> = affected
                .iter()
                .map(|(_, watch_path)| value_at(&root, watch_path).cloned())
                .collect();
            op(&mut *root);
            affected
                .into_iter()
                .zip(before)
                .filter_map(|((id, watch_path), before)| {
                    let after = value_at(&root, &watch_path).cloned();
                    (after != before).then(|| (id, Snapshot::new(watch_path, after)))
                })
                .collect()
        };

        // Locks are released: callbacks may call back into the store.
        let mut changed = changed;
        changed.sort_by_key(|(id, _)| *id);
        for (id, snapshot) in changed {
            self.notify(id, &snapshot);
        }
        Ok(())
    }

    fn notify(&self, id: SubscriptionId, snapshot: &Snapshot) {
        let callback = {
            let watches = self.inner.watches.read().unwrap_or_else(|e| e.into_inner());
            watches.get(&id).map(|watch| Arc::clone(&watch.callback))
        };
        if let Some(callback) = callback {
            callback(snapshot);
        }
    }
}

impl RealtimeStore for MemoryStore {
    fn read(&self, path: &str) -> StoreResult<Option<Value>> {
        self.ensure_available()?;
        let path = normalize_path(path)?;
        let root = self.inner.root.read().unwrap_or_else(|e| e.into_inner());
        Ok(value_at(&root, &path).cloned())
    }

    fn write(&self, path: &str, value: Value) -> StoreResult<()> {
        let segments = owned_segments(path)?;
        self.mutate(path, |root| set_at(root, &segments, Some(value)))
    }

    fn patch(&self, path: &str, partial: Map<String, Value>) -> StoreResult<()> {
        let segments = owned_segments(path)?;
        self.mutate(path, |root| {
            for (key, value) in partial {
                let mut child = segments.clone();
                child.push(key);
                let value = (!value.is_null()).then_some(value);
                set_at(root, &child, value);
            }
        })
    }

    fn delete(&self, path: &str) -> StoreResult<()> {
        let segments = owned_segments(path)?;
        self.mutate(path, |root| set_at(root, &segments, None))
    }

    fn subscribe(&self, path: &str, callback: SnapshotCallback) -> StoreResult<Subscription> {
        self.ensure_available()?;
        let path = normalize_path(path)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        self.inner
            .watches
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Watch {
                    path: path.clone(),
                    callback: Arc::clone(&callback),
                },
            );
        log::debug!("[MemoryStore] subscription {} on '{}'", id, path);

        let current = self.read(&path)?;
        callback(&Snapshot::new(path, current));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .watches
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                log::debug!("[MemoryStore] subscription {} released", id);
            }
        }))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("available", &self.is_available())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

fn owned_segments(path: &str) -> StoreResult<Vec<String>> {
    Ok(super::path_segments(path)?
        .into_iter()
        .map(str::to_string)
        .collect())
}

fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    if !path.is_empty() {
        for segment in path.split('/') {
            node = node.as_object()?.get(segment)?;
        }
    }
    (!is_empty_node(node)).then_some(node)
}

/// Store `value` at `segments`, or remove the node when `value` is `None`.
///
/// Intermediate objects are created on demand and empty ones are pruned on
/// the way back up, so the tree never holds `null` or `{}` nodes.
fn set_at(node: &mut Value, segments: &[String], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value.map(prune).unwrap_or(Value::Null);
        return;
    };
    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
        if is_empty_node(child) {
            map.remove(head);
        }
    }
    if is_empty_node(node) {
        *node = Value::Null;
    }
}

fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, prune(v)))
                .filter(|(_, v)| !is_empty_node(v))
                .collect(),
        ),
        other => other,
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
