//! Integration tests for two editors sharing one store

use std::sync::{Arc, Mutex};

use quillsync_core::{
    ActiveTypist, EditorSession, ExpiryPolicy, ManualScheduler, MemoryStore, RealtimeStore,
    Subscription, SyncConfig, UserIdentity,
};
use serde_json::json;

struct World {
    store: MemoryStore,
    clock: ManualScheduler,
    config: SyncConfig,
}

impl World {
    fn new(policy: ExpiryPolicy) -> Self {
        Self {
            store: MemoryStore::new(),
            clock: ManualScheduler::at_epoch(),
            config: SyncConfig {
                expiry_policy: policy,
                ..SyncConfig::default()
            },
        }
    }

    fn join(&self, username: &str, color: &str) -> EditorSession {
        EditorSession::new(
            Arc::new(self.store.clone()),
            Arc::new(self.clock.clone()),
            UserIdentity::new(username, color),
            self.config.clone(),
        )
        .unwrap()
    }
}

/// Records every active set delivered to a presence subscription.
fn watch_presence(session: &EditorSession) -> (Subscription, Arc<Mutex<Vec<Vec<String>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let sub = session
        .subscribe_presence(move |typists: &[ActiveTypist]| {
            let names = typists.iter().map(|t| t.username.clone()).collect();
            seen_clone.lock().unwrap().push(names);
        })
        .unwrap();
    (sub, seen)
}

fn typing_names(session: &EditorSession) -> Vec<String> {
    session
        .active_typists()
        .into_iter()
        .map(|t| t.username)
        .collect()
}

#[test]
fn test_hello_scenario() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("A", "red");
    let bob = world.join("B", "blue");
    let (_sub, seen) = watch_presence(&bob);

    alice.on_local_change("hello");
    assert_eq!(alice.local_state().displayed_text, "hello");
    assert_eq!(world.store.read("editor").unwrap(), None);

    world.clock.advance_ms(300);
    let stored = world.store.read("editor").unwrap().unwrap();
    assert_eq!(stored["text"], json!("hello"));
    assert_eq!(stored["editedBy"], json!("A"));
    assert_eq!(typing_names(&bob), vec!["A"]);

    // Pushed at t=300, so A is live until t=5300.
    world.clock.advance_ms(4999);
    assert_eq!(typing_names(&bob), vec!["A"]);
    world.clock.advance_ms(1);
    assert!(typing_names(&bob).is_empty());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&Vec::<String>::new()));
    assert_eq!(seen.last(), Some(&Vec::<String>::new()));
    assert!(seen.contains(&vec!["A".to_string()]));
}

#[test]
fn test_idle_peer_receives_remote_text() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");
    let bob = world.join("bob", "blue");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let _sub = bob
        .subscribe_document(move |text| received_clone.lock().unwrap().push(text.to_string()))
        .unwrap();

    alice.on_local_change("draft");
    world.clock.advance_ms(300);

    assert_eq!(*received.lock().unwrap(), vec!["draft"]);
    assert_eq!(bob.local_state().displayed_text, "draft");
}

#[test]
fn test_local_typing_wins_over_concurrent_remote_push() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");
    let bob = world.join("bob", "blue");
    let _a = alice.subscribe_document(|_| {}).unwrap();
    let _b = bob.subscribe_document(|_| {}).unwrap();
    let (_pa, _) = watch_presence(&alice);
    let (_pb, _) = watch_presence(&bob);

    alice.on_local_change("alice was here");
    world.clock.advance_ms(100);
    bob.on_local_change("bob was here");
    world.clock.advance_ms(200);

    // Alice's push landed while Bob was mid-burst: Bob keeps his text.
    assert_eq!(bob.local_state().displayed_text, "bob was here");
    assert!(bob.local_state().is_typing_locally);

    world.clock.advance_ms(100);

    // Bob's push overwrites the document and the now-idle Alice adopts it.
    assert_eq!(world.store.read("editor/text").unwrap(), Some(json!("bob was here")));
    assert_eq!(alice.local_state().displayed_text, "bob was here");
    assert_eq!(typing_names(&alice), vec!["bob"]);
    assert_eq!(typing_names(&bob), vec!["alice"]);
}

#[test]
fn test_local_user_never_listed_as_typing() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("Alice", "red");
    let (_sub, seen) = watch_presence(&alice);

    alice.on_local_change("solo");
    world.clock.advance_ms(300);

    assert!(seen.lock().unwrap().iter().all(|set| set.is_empty()));
    assert!(world.store.read("activity/alice").unwrap().is_some());
}

#[test]
fn test_stale_expiry_deletes_active_typist_under_independent_policy() {
    let world = World::new(ExpiryPolicy::Independent);
    let alice = world.join("alice", "red");
    let bob = world.join("bob", "blue");
    let (_sub, _seen) = watch_presence(&bob);

    // Push at t=300 (expiry due t=6300), push again at t=5300 (expiry due t=11300).
    alice.on_local_change("a");
    world.clock.advance_ms(5000);
    alice.on_local_change("ab");
    world.clock.advance_ms(300);
    assert_eq!(typing_names(&bob), vec!["alice"]);

    // The first timer still fires and removes the fresh heartbeat.
    world.clock.advance_ms(1000);
    assert_eq!(world.store.read("activity/alice").unwrap(), None);
    assert!(typing_names(&bob).is_empty());

    // Alice reappears on her next push.
    alice.on_local_change("abc");
    world.clock.advance_ms(300);
    assert_eq!(typing_names(&bob), vec!["alice"]);
}

#[test]
fn test_rescheduled_expiry_keeps_active_typist() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");
    let bob = world.join("bob", "blue");
    let (_sub, _seen) = watch_presence(&bob);

    alice.on_local_change("a");
    world.clock.advance_ms(5000);
    alice.on_local_change("ab");
    world.clock.advance_ms(300);

    world.clock.advance_ms(1000);
    assert!(world.store.read("activity/alice").unwrap().is_some());
    assert_eq!(typing_names(&bob), vec!["alice"]);

    // Live until 5300 + 5000, deleted at 5300 + 6000.
    world.clock.advance_ms(3999);
    assert_eq!(typing_names(&bob), vec!["alice"]);
    world.clock.advance_ms(1);
    assert!(typing_names(&bob).is_empty());
    world.clock.advance_ms(1000);
    assert_eq!(world.store.read("activity").unwrap(), None);
}

#[test]
fn test_unsubscribe_twice_is_idempotent() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");
    let bob = world.join("bob", "blue");

    let calls = Arc::new(Mutex::new(0));
    let calls_clone = Arc::clone(&calls);
    let doc_sub = bob
        .subscribe_document(move |_| *calls_clone.lock().unwrap() += 1)
        .unwrap();
    let (presence_sub, seen) = watch_presence(&bob);

    assert!(doc_sub.unsubscribe());
    assert!(!doc_sub.unsubscribe());
    assert!(presence_sub.unsubscribe());
    assert!(!presence_sub.unsubscribe());

    alice.on_local_change("after");
    world.clock.advance_ms(300);

    assert_eq!(*calls.lock().unwrap(), 0);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(world.store.subscriber_count(), 0);
}

#[test]
fn test_offline_push_is_dropped() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");

    world.store.set_available(false);
    alice.on_local_change("gone");
    world.clock.advance_ms(300);
    world.store.set_available(true);

    assert_eq!(alice.local_state().displayed_text, "gone");
    assert!(!alice.local_state().is_typing_locally);
    assert_eq!(world.store.read("editor").unwrap(), None);

    // The next edit goes through normally.
    alice.on_local_change("back");
    world.clock.advance_ms(300);
    assert_eq!(world.store.read("editor/text").unwrap(), Some(json!("back")));
}

#[test]
fn test_missing_color_uses_fallback() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let bob = world.join("bob", "blue");
    world
        .store
        .write(
            "activity/legacy",
            json!({"username": "legacy", "timestamp": "1970-01-01T00:00:00Z"}),
        )
        .unwrap();

    let (_sub, _seen) = watch_presence(&bob);
    let typists = bob.active_typists();

    assert_eq!(typists.len(), 1);
    assert_eq!(typists[0].color, "black");
}

#[test]
fn test_keyless_user_never_expires_other_heartbeats() {
    let world = World::new(ExpiryPolicy::Reschedule);
    let alice = world.join("alice", "red");
    let slash = world.join("/", "green");
    let bob = world.join("bob", "blue");
    let (_sub, _seen) = watch_presence(&bob);

    // "/" pushes at t=300; its heartbeat is rejected, so no expiry is armed.
    slash.on_local_change("odd name");
    world.clock.advance_ms(300);
    assert_eq!(world.store.read("editor/editedBy").unwrap(), Some(json!("/")));
    assert_eq!(world.store.read("activity").unwrap(), None);

    world.clock.advance_ms(5000);
    alice.on_local_change("still here");
    world.clock.advance_ms(300);

    // Well past t=6300, when an expiry for "/" would have fired.
    world.clock.advance_ms(1000);
    assert!(world.store.read("activity/alice").unwrap().is_some());
    assert_eq!(typing_names(&bob), vec!["alice"]);
}
