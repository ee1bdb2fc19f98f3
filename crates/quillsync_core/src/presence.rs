//! Typing presence.
//!
//! Every push of the shared document is accompanied by a [`Heartbeat`] for the
//! pushing user, stored under the case-folded username in the presence
//! collection. Readers turn the raw collection into the set of *other* users
//! whose heartbeat is younger than the liveness window.
//!
//! # Lifecycle of one username
//!
//! ```text
//! ABSENT ──publish──► ACTIVE ──expiry timer──► ABSENT
//! ```
//!
//! Under [`ExpiryPolicy::Independent`] every publish starts its own expiry
//! timer and an older timer can delete a newer heartbeat. Under
//! [`ExpiryPolicy::Reschedule`] a publish cancels the previous timer first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::callback_registry::{CallbackRegistry, SubscriptionId};
use crate::config::{ExpiryPolicy, SyncConfig};
use crate::error::{QuillsyncError, Result};
use crate::scheduler::{Scheduler, TimerId, deadline_after, millis_between};
use crate::store::{RealtimeStore, Snapshot, Subscription, child_path};

/// A record announcing that a user was typing at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Heartbeat {
    /// Username as typed at login (not case-folded)
    pub username: String,
    /// Display color
    pub color: String,
    /// When the heartbeat was published
    pub timestamp: DateTime<Utc>,
}

/// A user currently shown as typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActiveTypist {
    /// Username as published
    pub username: String,
    /// Display color (the fallback color when the heartbeat had none)
    pub color: String,
}

/// Heartbeat as found in the store; older clients may omit the color.
#[derive(Deserialize)]
struct StoredHeartbeat {
    username: String,
    #[serde(default)]
    color: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Storage key for a username's heartbeat.
pub fn heartbeat_key(username: &str) -> String {
    username.to_lowercase()
}

/// Parse the raw presence collection, in the collection's iteration order.
///
/// Entries that are not valid heartbeats are skipped. A missing color is
/// replaced by `fallback_color`.
pub fn parse_heartbeats(collection: Option<&Value>, fallback_color: &str) -> Vec<Heartbeat> {
    let Some(Value::Object(entries)) = collection else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(key, entry)| {
            match serde_json::from_value::<StoredHeartbeat>(entry.clone()) {
                Ok(stored) => Some(Heartbeat {
                    username: stored.username,
                    color: stored
                        .color
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| fallback_color.to_string()),
                    timestamp: stored.timestamp,
                }),
                Err(e) => {
                    log::debug!("[Presence] Skipping malformed heartbeat '{}': {}", key, e);
                    None
                }
            }
        })
        .collect()
}

/// Compute who is typing right now.
///
/// A heartbeat is included iff it is younger than `liveness` at `now` and does
/// not belong to `local_username`. Usernames are compared case-folded, the
/// same way they are keyed in the store. The result keeps the input order.
pub fn compute_active_set(
    heartbeats: &[Heartbeat],
    local_username: &str,
    now: DateTime<Utc>,
    liveness: Duration,
) -> Vec<ActiveTypist> {
    let local_key = heartbeat_key(local_username);
    heartbeats
        .iter()
        .filter(|hb| is_live(hb, now, liveness) && heartbeat_key(&hb.username) != local_key)
        .map(|hb| ActiveTypist {
            username: hb.username.clone(),
            color: hb.color.clone(),
        })
        .collect()
}

fn is_live(heartbeat: &Heartbeat, now: DateTime<Utc>, liveness: Duration) -> bool {
    let window = i64::try_from(liveness.as_millis()).unwrap_or(i64::MAX);
    millis_between(heartbeat.timestamp, now) < window
}

/// Render the "who is typing" line, e.g. `"alice and bob are typing..."`.
///
/// Returns `None` when nobody is typing.
pub fn typing_indicator(typists: &[ActiveTypist]) -> Option<String> {
    if typists.is_empty() {
        return None;
    }
    let names: Vec<&str> = typists.iter().map(|t| t.username.as_str()).collect();
    let verb = if typists.len() > 1 { "are" } else { "is" };
    Some(format!("{} {} typing...", names.join(" and "), verb))
}

/// Publishes the local user's heartbeats and tracks everyone else's.
///
/// Cloning yields another handle onto the same tracker.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RealtimeStore>,
    scheduler: Arc<dyn Scheduler>,
    config: SyncConfig,
    local_username: RwLock<String>,
    /// Last collection seen from the store.
    latest: Mutex<Vec<Heartbeat>>,
    listeners: CallbackRegistry<Vec<ActiveTypist>>,
    /// Pending expiry per heartbeat key (Reschedule policy only).
    expiry_timers: Mutex<HashMap<String, TimerId>>,
    refresh_timer: Mutex<Option<TimerId>>,
}

impl PresenceTracker {
    /// Create a tracker for `local_username`.
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        scheduler: Arc<dyn Scheduler>,
        local_username: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                scheduler,
                config,
                local_username: RwLock::new(local_username.into()),
                latest: Mutex::new(Vec::new()),
                listeners: CallbackRegistry::new(),
                expiry_timers: Mutex::new(HashMap::new()),
                refresh_timer: Mutex::new(None),
            }),
        }
    }

    /// The username whose heartbeats are excluded from the active set.
    pub fn local_username(&self) -> String {
        self.inner.local_username()
    }

    /// Change the local username and re-deliver the active set to every listener.
    pub fn set_local_username(&self, username: impl Into<String>) {
        let username = username.into();
        log::debug!("[Presence] Local username is now '{}'", username);
        *self
            .inner
            .local_username
            .write()
            .unwrap_or_else(|e| e.into_inner()) = username;
        self.inner.emit_all();
    }

    /// Upsert the heartbeat for `username`.
    ///
    /// The entry is keyed by the case-folded username, so a second tab of the
    /// same user overwrites the first.
    pub fn publish_heartbeat(
        &self,
        username: &str,
        color: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let key = self.inner.entry_key(username)?;
        let heartbeat = Heartbeat {
            username: username.to_string(),
            color: color.to_string(),
            timestamp,
        };
        let mut partial = Map::new();
        partial.insert(key, serde_json::to_value(&heartbeat)?);
        self.inner
            .store
            .patch(&self.inner.config.presence_path, partial)
    }

    /// Delete the heartbeat of `username` once `after` has elapsed.
    ///
    /// With [`ExpiryPolicy::Reschedule`] any earlier pending expiry for the
    /// same username is cancelled first; with [`ExpiryPolicy::Independent`]
    /// it is left to fire at its original deadline.
    ///
    /// Returns `None` without scheduling anything when `username` has no
    /// usable key, since no heartbeat can exist for it.
    pub fn expire_heartbeat(&self, username: &str, after: Duration) -> Option<TimerId> {
        let key = match self.inner.entry_key(username) {
            Ok(key) => key,
            Err(e) => {
                log::debug!("[Presence] Not scheduling expiry: {}", e);
                return None;
            }
        };
        let weak = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let task = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.fire_expiry(&task_key);
            }
        });

        match self.inner.config.expiry_policy {
            ExpiryPolicy::Independent => {
                let id = self.inner.scheduler.schedule(after, task);
                log::debug!("[Presence] Expiry {} for '{}' in {:?}", id, key, after);
                Some(id)
            }
            ExpiryPolicy::Reschedule => {
                let mut timers = self
                    .inner
                    .expiry_timers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if let Some(previous) = timers.remove(&key) {
                    self.inner.scheduler.cancel(previous);
                }
                let id = self.inner.scheduler.schedule(after, task);
                log::debug!("[Presence] Expiry {} for '{}' in {:?}", id, key, after);
                timers.insert(key, id);
                Some(id)
            }
        }
    }

    /// Listen for changes to the active typist set.
    ///
    /// The callback fires immediately with the current set, then whenever the
    /// presence collection changes, the local username changes, or a heartbeat
    /// ages out of the liveness window.
    pub fn subscribe(
        &self,
        on_active_set: impl Fn(&[ActiveTypist]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let id = self
            .inner
            .listeners
            .subscribe(Arc::new(move |set: &Vec<ActiveTypist>| on_active_set(set.as_slice())));

        let weak = Arc::downgrade(&self.inner);
        let store_sub = self.inner.store.subscribe(
            &self.inner.config.presence_path,
            Arc::new(move |snapshot: &Snapshot| {
                if let Some(inner) = weak.upgrade() {
                    inner.ingest(snapshot);
                    inner.emit_to(id);
                }
            }),
        );
        let store_sub = match store_sub {
            Ok(sub) => sub,
            Err(e) => {
                self.inner.listeners.unsubscribe(id);
                return Err(e);
            }
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            store_sub.unsubscribe();
            if let Some(inner) = weak.upgrade() {
                inner.listeners.unsubscribe(id);
                if !inner.listeners.has_subscribers() {
                    inner.cancel_refresh();
                }
            }
        }))
    }

    /// Recompute the active set from the last seen collection at the current time.
    pub fn active_set(&self) -> Vec<ActiveTypist> {
        self.inner.compute()
    }

    /// Number of pending expiry timers tracked for rescheduling.
    pub fn pending_expiries(&self) -> usize {
        self.inner
            .expiry_timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Inner {
    fn local_username(&self) -> String {
        self.local_username
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Case-folded key for `username`, rejected when it would not address a
    /// single child of the presence collection.
    fn entry_key(&self, username: &str) -> Result<String> {
        let key = heartbeat_key(username);
        if key.is_empty() || key.contains('/') {
            return Err(QuillsyncError::InvalidPath(child_path(
                &self.config.presence_path,
                &key,
            )));
        }
        Ok(key)
    }

    fn ingest(&self, snapshot: &Snapshot) {
        let heartbeats = parse_heartbeats(snapshot.value.as_ref(), &self.config.fallback_color);
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = heartbeats;
    }

    fn compute(&self) -> Vec<ActiveTypist> {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        compute_active_set(
            &latest,
            &self.local_username(),
            self.scheduler.now(),
            self.config.liveness(),
        )
    }

    fn emit_to(self: &Arc<Self>, id: SubscriptionId) {
        let set = self.compute();
        self.listeners.emit_to(id, &set);
        self.schedule_refresh();
    }

    fn emit_all(self: &Arc<Self>) {
        let set = self.compute();
        self.listeners.emit(&set);
        self.schedule_refresh();
    }

    /// Arrange a recompute for the moment the oldest counted heartbeat leaves
    /// the liveness window.
    fn schedule_refresh(self: &Arc<Self>) {
        self.cancel_refresh();
        if !self.listeners.has_subscribers() {
            return;
        }

        let now = self.scheduler.now();
        let liveness = self.config.liveness();
        let local_key = heartbeat_key(&self.local_username());
        let next_boundary = self
            .latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|hb| is_live(hb, now, liveness) && heartbeat_key(&hb.username) != local_key)
            .map(|hb| deadline_after(hb.timestamp, liveness))
            .min();
        let Some(boundary) = next_boundary else {
            return;
        };

        let delay = (boundary - now).to_std().unwrap_or(Duration::ZERO);
        let weak = Arc::downgrade(self);
        let id = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.clear_refresh();
                    inner.emit_all();
                }
            }),
        );
        *self.refresh_timer.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    fn cancel_refresh(&self) {
        let previous = self
            .refresh_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            self.scheduler.cancel(previous);
        }
    }

    fn clear_refresh(&self) {
        self.refresh_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    fn fire_expiry(&self, key: &str) {
        if self.config.expiry_policy == ExpiryPolicy::Reschedule {
            self.expiry_timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(key);
        }
        let path = child_path(&self.config.presence_path, key);
        log::debug!("[Presence] Expiring heartbeat at '{}'", path);
        if let Err(e) = self.store.delete(&path) {
            log::warn!("[Presence] Failed to expire heartbeat '{}': {}", key, e);
        }
    }
}
