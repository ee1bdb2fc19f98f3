//! Callback registry for fan-out notifications.
//!
//! This module provides a thread-safe registry for managing listener callbacks.
//! The presence tracker uses it to re-deliver recomputed typist sets to every
//! live listener when something other than a store change (a username change,
//! a heartbeat aging out) alters the result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for registry events.
///
/// Listeners run on the emitting thread, so they should return quickly.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe registry for managing event subscriptions.
///
/// Each listener gets an id on subscribe; the id is the handle for
/// unsubscribing and for targeted delivery with [`emit_to`](Self::emit_to).
///
/// # Example
///
/// ```ignore
/// use quillsync_core::callback_registry::CallbackRegistry;
/// use std::sync::Arc;
///
/// let registry = CallbackRegistry::<String>::new();
///
/// let id = registry.subscribe(Arc::new(|event| {
///     println!("Event: {}", event);
/// }));
///
/// registry.emit(&"hello".to_string());
///
/// registry.unsubscribe(id);
/// ```
pub struct CallbackRegistry<E> {
    callbacks: RwLock<HashMap<SubscriptionId, Callback<E>>>,
    next_id: AtomicU64,
}

impl<E> CallbackRegistry<E> {
    /// Create a new empty callback registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: Callback<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.insert(id, callback);
        id
    }

    /// Unsubscribe from events.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.remove(&id).is_some()
    }

    /// Emit an event to all registered callbacks.
    ///
    /// Callbacks are invoked synchronously in an undefined order, with no lock
    /// held, so a callback may subscribe or unsubscribe. If a callback panics,
    /// it does not affect other callbacks.
    pub fn emit(&self, event: &E) {
        let ids: Vec<SubscriptionId> = {
            let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
            callbacks.keys().copied().collect()
        };
        for id in ids {
            self.emit_to(id, event);
        }
    }

    /// Emit an event to a single subscriber.
    ///
    /// Returns `false` if the subscriber is gone (a callback removed earlier in
    /// the same round is never invoked).
    pub fn emit_to(&self, id: SubscriptionId, event: &E) -> bool {
        let Some(callback) = self.get(id) else {
            return false;
        };
        // A panicking listener must not take the emitter down with it.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(event);
        }));
        true
    }

    fn get(&self, id: SubscriptionId) -> Option<Callback<E>> {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        callbacks.get(&id).cloned()
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        callbacks.len()
    }

    /// Check if there are any active subscriptions.
    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }
}

impl<E> Default for CallbackRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CallbackRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}
