//! One local user's editing session.
//!
//! [`EditorSession`] builds a [`PresenceTracker`] and a [`DocumentSync`] over
//! a shared store and scheduler and exposes what an editor view needs:
//! keystroke input, the document subscription, and the typing-presence
//! subscription.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use quillsync_core::{EditorSession, ManualScheduler, MemoryStore, SyncConfig, UserIdentity};
//!
//! let store = Arc::new(MemoryStore::new());
//! let clock = Arc::new(ManualScheduler::at_epoch());
//! let identity = UserIdentity::new("alice", "red");
//! let session = EditorSession::new(store, clock.clone(), identity, SyncConfig::default())?;
//!
//! let _doc = session.subscribe_document(|text| println!("remote: {text}"))?;
//! let _who = session.subscribe_presence(|typists| println!("{} typing", typists.len()))?;
//! session.on_local_change("hello");
//! clock.advance_ms(300);
//! ```

use std::sync::Arc;

use crate::config::{SyncConfig, UserIdentity};
use crate::document::{DocumentSync, LocalEditState};
use crate::error::Result;
use crate::presence::{ActiveTypist, PresenceTracker};
use crate::scheduler::Scheduler;
use crate::store::{RealtimeStore, Subscription};

/// Consumer-facing entry point for one local user.
#[derive(Clone)]
pub struct EditorSession {
    presence: PresenceTracker,
    document: DocumentSync,
}

impl EditorSession {
    /// Start a session for `identity`.
    ///
    /// Fails if `config` does not validate. Nothing is read or written until
    /// the first subscription or keystroke.
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        scheduler: Arc<dyn Scheduler>,
        identity: UserIdentity,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        let presence = PresenceTracker::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            identity.username.clone(),
            config.clone(),
        );
        let document = DocumentSync::new(store, scheduler, presence.clone(), identity, config);
        Ok(Self { presence, document })
    }

    /// Handle a keystroke (see [`DocumentSync::on_local_change`]).
    pub fn on_local_change(&self, new_text: impl Into<String>) {
        self.document.on_local_change(new_text);
    }

    /// Listen for remote document text accepted into the local view.
    pub fn subscribe_document(
        &self,
        on_remote_text: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.document.subscribe(on_remote_text)
    }

    /// Listen for changes to who else is typing.
    pub fn subscribe_presence(
        &self,
        on_active_set: impl Fn(&[ActiveTypist]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.presence.subscribe(on_active_set)
    }

    /// Snapshot of the local document view.
    pub fn local_state(&self) -> LocalEditState {
        self.document.local_state()
    }

    /// Who else is typing right now.
    pub fn active_typists(&self) -> Vec<ActiveTypist> {
        self.presence.active_set()
    }

    /// Push any pending edit immediately.
    pub fn flush(&self) -> bool {
        self.document.flush()
    }

    /// The local user.
    pub fn identity(&self) -> UserIdentity {
        self.document.identity()
    }

    /// Switch to another username, keeping the color.
    ///
    /// Later pushes are stamped with the new name and presence listeners are
    /// re-evaluated against it. Heartbeats already published under the old
    /// name are left to expire.
    pub fn rename(&self, username: impl Into<String>) {
        let username = username.into();
        let mut identity = self.document.identity();
        identity.username.clone_from(&username);
        self.document.set_identity(identity);
        self.presence.set_local_username(username);
    }

    /// The presence half of the session.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }
}
