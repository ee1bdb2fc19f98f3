//! Shared document synchronization.
//!
//! [`DocumentSync`] owns the local copy of the shared text. Local keystrokes
//! are echoed instantly and pushed upstream after a trailing-edge debounce;
//! remote versions are accepted only while the local user is not mid-burst.
//!
//! # Conflict Policy
//!
//! Last writer wins at whole-document granularity. A remote update that
//! arrives while `is_typing_locally` is set is dropped, and the local push
//! that follows overwrites it in the store.
//!
//! ```text
//! keystroke ──► displayed_text (now) ──► debounce ──► write document
//!                                                  ├─► publish heartbeat
//!                                                  ├─► schedule heartbeat expiry
//!                                                  └─► is_typing_locally = false
//! ```

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::config::{SyncConfig, UserIdentity};
use crate::error::Result;
use crate::presence::PresenceTracker;
use crate::scheduler::{Scheduler, TimerId};
use crate::store::{RealtimeStore, Snapshot, Subscription};

/// The single shared document as stored upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full document text
    pub text: String,
    /// Username of the last writer
    pub edited_by: String,
    /// When the last write happened
    pub edited_at: DateTime<Utc>,
}

impl Document {
    /// Parse a full document out of a store snapshot.
    ///
    /// Returns `None` when the snapshot is empty or not a complete document.
    pub fn from_snapshot(snapshot: &Snapshot) -> Option<Self> {
        let value = snapshot.value.clone()?;
        serde_json::from_value(value).ok()
    }
}

/// Extract the text of a document snapshot, if it has one.
///
/// Only the `text` field matters for reconciliation; a snapshot missing it
/// (or holding a non-string) is treated as having no text.
pub fn snapshot_text(snapshot: &Snapshot) -> Option<&str> {
    snapshot.value.as_ref()?.get("text").and_then(Value::as_str)
}

/// Local view of the shared document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEditState {
    /// Text currently shown to the local user
    pub displayed_text: String,
    /// Set on every keystroke, cleared when the debounced push fires
    pub is_typing_locally: bool,
}

struct PendingPush {
    timer: TimerId,
    text: String,
}

/// Keeps the local document view in step with the shared store.
///
/// Cloning yields another handle onto the same state.
#[derive(Clone)]
pub struct DocumentSync {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn RealtimeStore>,
    scheduler: Arc<dyn Scheduler>,
    presence: PresenceTracker,
    identity: RwLock<UserIdentity>,
    config: SyncConfig,
    state: Mutex<LocalEditState>,
    pending: Mutex<Option<PendingPush>>,
}

impl DocumentSync {
    /// Create a document synchronizer for `identity`.
    ///
    /// `presence` receives a heartbeat alongside every push.
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        scheduler: Arc<dyn Scheduler>,
        presence: PresenceTracker,
        identity: UserIdentity,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                scheduler,
                presence,
                identity: RwLock::new(identity),
                config,
                state: Mutex::new(LocalEditState::default()),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Listen for remote versions of the document.
    ///
    /// `on_remote_text` is called with the new text every time a remote
    /// version is accepted into the local view (including the initial value,
    /// if the store already holds one). Dropped updates are not reported.
    pub fn subscribe(
        &self,
        on_remote_text: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.store.subscribe(
            &self.inner.config.document_path,
            Arc::new(move |snapshot: &Snapshot| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Some(text) = inner.on_remote_update(snapshot) {
                    on_remote_text(&text);
                }
            }),
        )
    }

    /// Reconcile a remote snapshot into the local view.
    ///
    /// Returns the accepted text, or `None` if the snapshot had no text or the
    /// local user is mid-edit.
    pub fn on_remote_update(&self, snapshot: &Snapshot) -> Option<String> {
        self.inner.on_remote_update(snapshot)
    }

    /// Handle a local keystroke.
    ///
    /// The new text is displayed immediately and a push is (re)scheduled for
    /// one debounce window from now.
    pub fn on_local_change(&self, new_text: impl Into<String>) {
        let new_text = new_text.into();
        {
            let mut state = self.inner.lock_state();
            state.displayed_text.clone_from(&new_text);
            state.is_typing_locally = true;
        }

        let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.take() {
            self.inner.scheduler.cancel(previous.timer);
        }
        let weak = Arc::downgrade(&self.inner);
        let timer = self.inner.scheduler.schedule(
            self.inner.config.debounce(),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.push_pending();
                }
            }),
        );
        *pending = Some(PendingPush {
            timer,
            text: new_text,
        });
    }

    /// Push the pending edit now instead of waiting for the debounce.
    ///
    /// Returns `false` if there was nothing to push.
    pub fn flush(&self) -> bool {
        let pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match pending {
            Some(pending) => {
                self.inner.scheduler.cancel(pending.timer);
                self.inner.push(pending.text);
                true
            }
            None => false,
        }
    }

    /// Whether a debounced push is waiting to fire.
    pub fn has_pending_push(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Snapshot of the local view.
    pub fn local_state(&self) -> LocalEditState {
        self.inner.lock_state().clone()
    }

    /// Text currently shown to the local user.
    pub fn displayed_text(&self) -> String {
        self.inner.lock_state().displayed_text.clone()
    }

    /// Whether a local burst is in progress.
    pub fn is_typing_locally(&self) -> bool {
        self.inner.lock_state().is_typing_locally
    }

    /// The identity stamped on pushes and heartbeats.
    pub fn identity(&self) -> UserIdentity {
        self.inner
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the identity used for subsequent pushes.
    pub fn set_identity(&self, identity: UserIdentity) {
        *self
            .inner
            .identity
            .write()
            .unwrap_or_else(|e| e.into_inner()) = identity;
    }
}

impl Inner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, LocalEditState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn on_remote_update(&self, snapshot: &Snapshot) -> Option<String> {
        let text = snapshot_text(snapshot)?;
        let mut state = self.lock_state();
        if state.is_typing_locally {
            log::debug!(
                "[DocumentSync] Dropping remote update ({} chars) during local edit",
                text.len()
            );
            return None;
        }
        state.displayed_text = text.to_string();
        Some(text.to_string())
    }

    fn push_pending(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pending) = pending {
            self.push(pending.text);
        }
    }

    /// Write the document, publish a heartbeat, and schedule its expiry.
    ///
    /// Store failures are logged and swallowed: the edit is lost, there is no
    /// retry and no local queue.
    fn push(&self, text: String) {
        let identity = self
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let now = self.scheduler.now();
        let document = Document {
            text,
            edited_by: identity.username.clone(),
            edited_at: now,
        };

        let written: Result<()> = serde_json::to_value(&document)
            .map_err(Into::into)
            .and_then(|value| self.store.write(&self.config.document_path, value));
        match written {
            Ok(()) => log::info!(
                "[DocumentSync] Pushed {} chars as '{}'",
                document.text.len(),
                identity.username
            ),
            Err(e) => log::warn!("[DocumentSync] Failed to push document: {}", e),
        }

        // Only a published heartbeat gets an expiry.
        match self
            .presence
            .publish_heartbeat(&identity.username, &identity.color, now)
        {
            Ok(()) => {
                self.presence
                    .expire_heartbeat(&identity.username, self.config.expiry());
            }
            Err(e) => log::warn!("[DocumentSync] Failed to publish heartbeat: {}", e),
        }

        self.lock_state().is_typing_locally = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: MemoryStore,
        scheduler: ManualScheduler,
        sync: DocumentSync,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let scheduler = ManualScheduler::at_epoch();
        let config = SyncConfig::default();
        let store_arc: Arc<dyn RealtimeStore> = Arc::new(store.clone());
        let scheduler_arc: Arc<dyn Scheduler> = Arc::new(scheduler.clone());
        let presence = PresenceTracker::new(
            Arc::clone(&store_arc),
            Arc::clone(&scheduler_arc),
            "alice",
            config.clone(),
        );
        let sync = DocumentSync::new(
            store_arc,
            scheduler_arc,
            presence,
            UserIdentity::new("alice", "red"),
            config,
        );
        Fixture {
            store,
            scheduler,
            sync,
        }
    }

    fn remote(text: &str) -> Snapshot {
        Snapshot::new(
            "editor",
            Some(json!({"text": text, "editedBy": "bob", "editedAt": "1970-01-01T00:00:00Z"})),
        )
    }

    #[test]
    fn test_local_change_is_displayed_immediately() {
        let f = fixture();
        f.sync.on_local_change("h");

        let state = f.sync.local_state();
        assert_eq!(state.displayed_text, "h");
        assert!(state.is_typing_locally);
        assert!(f.sync.has_pending_push());
        assert_eq!(f.store.read("editor").unwrap(), None);
    }

    #[test]
    fn test_debounce_coalesces_burst() {
        let f = fixture();
        f.sync.on_local_change("h");
        f.scheduler.advance_ms(200);
        f.sync.on_local_change("he");
        f.scheduler.advance_ms(200);
        assert_eq!(f.store.read("editor").unwrap(), None);

        f.scheduler.advance_ms(100);
        let stored = f.store.read("editor").unwrap().unwrap();
        assert_eq!(stored["text"], json!("he"));
        assert_eq!(stored["editedBy"], json!("alice"));
        assert!(!f.sync.is_typing_locally());
        assert!(!f.sync.has_pending_push());
    }

    #[test]
    fn test_push_publishes_heartbeat_and_schedules_expiry() {
        let f = fixture();
        f.sync.on_local_change("hello");
        f.scheduler.advance_ms(300);

        let heartbeat = f.store.read("activity/alice").unwrap().unwrap();
        assert_eq!(heartbeat["username"], json!("alice"));
        assert_eq!(heartbeat["color"], json!("red"));

        f.scheduler.advance_ms(5999);
        assert!(f.store.read("activity/alice").unwrap().is_some());
        f.scheduler.advance_ms(1);
        assert_eq!(f.store.read("activity/alice").unwrap(), None);
    }

    #[test]
    fn test_remote_update_dropped_while_typing() {
        let f = fixture();
        f.sync.on_local_change("mine");

        assert_eq!(f.sync.on_remote_update(&remote("theirs")), None);
        assert_eq!(f.sync.displayed_text(), "mine");
    }

    #[test]
    fn test_remote_update_accepted_when_idle() {
        let f = fixture();
        assert_eq!(
            f.sync.on_remote_update(&remote("theirs")).as_deref(),
            Some("theirs")
        );
        assert_eq!(f.sync.displayed_text(), "theirs");
    }

    #[test]
    fn test_remote_update_without_text_is_ignored() {
        let f = fixture();
        f.sync.on_remote_update(&remote("seed"));

        assert_eq!(f.sync.on_remote_update(&Snapshot::new("editor", None)), None);
        assert_eq!(
            f.sync
                .on_remote_update(&Snapshot::new("editor", Some(json!({"editedBy": "bob"})))),
            None
        );
        assert_eq!(f.sync.displayed_text(), "seed");
    }

    #[test]
    fn test_subscribe_delivers_accepted_text() {
        let f = fixture();
        f.store
            .write(
                "editor",
                json!({"text": "initial", "editedBy": "bob", "editedAt": "1970-01-01T00:00:00Z"}),
            )
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = f
            .sync
            .subscribe(move |text| seen_clone.lock().unwrap().push(text.to_string()))
            .unwrap();

        f.sync.on_local_change("local");
        f.store.write("editor", json!({"text": "racing"})).unwrap();
        f.scheduler.advance_ms(300);
        f.store.write("editor", json!({"text": "later"})).unwrap();

        sub.unsubscribe();
        f.store.write("editor", json!({"text": "unheard"})).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["initial", "later"]);
        assert_eq!(f.sync.displayed_text(), "later");
    }

    #[test]
    fn test_flush_pushes_immediately() {
        let f = fixture();
        assert!(!f.sync.flush());

        f.sync.on_local_change("now");
        assert!(f.sync.flush());

        assert_eq!(f.store.read("editor/text").unwrap(), Some(json!("now")));
        assert!(!f.sync.is_typing_locally());
        f.scheduler.advance_ms(300);
        assert_eq!(f.scheduler.pending(), 1);
    }

    #[test]
    fn test_store_failure_is_swallowed() {
        let f = fixture();
        f.store.set_available(false);
        f.sync.on_local_change("lost");
        f.scheduler.advance_ms(300);

        assert!(!f.sync.is_typing_locally());
        assert_eq!(f.sync.displayed_text(), "lost");
        // No heartbeat was stored, so no expiry is pending.
        assert_eq!(f.scheduler.pending(), 0);

        f.store.set_available(true);
        assert_eq!(f.store.read("editor").unwrap(), None);
    }

    #[test]
    fn test_document_from_snapshot() {
        let doc = Document::from_snapshot(&remote("x")).unwrap();
        assert_eq!(doc.text, "x");
        assert_eq!(doc.edited_by, "bob");
        let partial = Snapshot::new("editor", Some(json!({"text": "x"})));
        assert!(Document::from_snapshot(&partial).is_none());
    }
}
