//! Configuration types for quillsync.
//!
//! This module provides the [`SyncConfig`] struct which holds the timing
//! constants and store layout used by the sync core, and [`UserIdentity`],
//! the local user as supplied by the login step. Configuration is persisted
//! as TOML; every field has a default, so an empty file is a valid config.
//!
//! # Key Configuration Fields
//!
//! - `debounce_ms`: quiescence before a burst of keystrokes is pushed
//! - `liveness_ms`: maximum heartbeat age still shown as "typing"
//! - `expiry_ms`: delay before a published heartbeat is deleted
//! - `document_path` / `presence_path`: where the store keeps the shared state
//! - `expiry_policy`: how overlapping heartbeat expiries interact
//!
//! # Example
//!
//! ```ignore
//! use quillsync_core::config::SyncConfig;
//!
//! let config = SyncConfig::from_toml_str("debounce_ms = 500")?;
//! assert_eq!(config.debounce().as_millis(), 500);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QuillsyncError, Result};
use crate::store::{normalize_path, paths_overlap};

/// How heartbeat expiry timers behave when a user publishes again before the
/// previous expiry fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Every publish schedules its own deletion and none is ever cancelled.
    ///
    /// An earlier timer deletes a newer heartbeat at its original deadline, so
    /// a continuous typist briefly disappears from other users' view.
    Independent,

    /// One timer per username, cancelled and rescheduled on every publish.
    #[default]
    Reschedule,
}

/// `SyncConfig` holds the tunable parts of the synchronization core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Trailing-edge debounce before local edits are pushed (milliseconds)
    pub debounce_ms: u64,

    /// Heartbeats younger than this are reported as typing (milliseconds)
    pub liveness_ms: u64,

    /// Delay after a push before the pusher's heartbeat is deleted (milliseconds)
    pub expiry_ms: u64,

    /// Color reported for heartbeats that carry none
    pub fallback_color: String,

    /// Store path of the shared document
    pub document_path: String,

    /// Store path of the heartbeat collection
    pub presence_path: String,

    /// Behavior of overlapping heartbeat expiries
    pub expiry_policy: ExpiryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            liveness_ms: 5000,
            expiry_ms: 6000,
            fallback_color: "black".to_string(),
            document_path: "editor".to_string(),
            presence_path: "activity".to_string(),
            expiry_policy: ExpiryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|source| QuillsyncError::ConfigRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Debounce window as a [`Duration`].
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Liveness window as a [`Duration`].
    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }

    /// Heartbeat expiry delay as a [`Duration`].
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    /// Check that the store paths are usable and the liveness window is non-zero.
    ///
    /// The document and presence paths must not overlap: a full-document write
    /// would otherwise wipe (or be polluted by) the heartbeat collection.
    pub fn validate(&self) -> Result<()> {
        if self.liveness_ms == 0 {
            return Err(QuillsyncError::InvalidConfig(
                "liveness_ms must be greater than zero".to_string(),
            ));
        }
        let document = normalize_path(&self.document_path)?;
        let presence = normalize_path(&self.presence_path)?;
        if document.is_empty() || presence.is_empty() {
            return Err(QuillsyncError::InvalidConfig(
                "document_path and presence_path must not be empty".to_string(),
            ));
        }
        if paths_overlap(&document, &presence) {
            return Err(QuillsyncError::InvalidConfig(format!(
                "document_path '{}' and presence_path '{}' overlap",
                document, presence
            )));
        }
        Ok(())
    }
}

/// The local user, as established by the login step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Display name, also the (case-folded) presence key
    pub username: String,
    /// Color shown next to the name in other users' typing indicator
    pub color: String,
}

impl UserIdentity {
    /// Create an identity.
    pub fn new(username: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            color: color.into(),
        }
    }
}
