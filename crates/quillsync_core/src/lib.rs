#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Callback registry for listener fan-out
pub mod callback_registry;

/// Configuration options
pub mod config;

/// Shared document synchronization
pub mod document;

/// Error (common error types)
pub mod error;

/// Typing presence (heartbeats and the active typist set)
pub mod presence;

/// One-shot timers and the virtual clock
pub mod scheduler;

/// Wiring of document and presence for one local user
pub mod session;

/// Realtime store abstraction and the in-memory store
pub mod store;

pub use config::{ExpiryPolicy, SyncConfig, UserIdentity};
pub use document::{Document, DocumentSync, LocalEditState};
pub use error::{QuillsyncError, Result};
pub use presence::{ActiveTypist, Heartbeat, PresenceTracker, compute_active_set, typing_indicator};
pub use scheduler::{ManualScheduler, Scheduler, TimerId};
pub use session::EditorSession;
pub use store::{MemoryStore, RealtimeStore, Snapshot, Subscription};
