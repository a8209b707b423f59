//! End-to-end tests driving the real backends through the sync engine.

use std::rc::Rc;

use serde_json::json;

use swire_core::{CellStore, Loadable};
use swire_stores::{FileStore, MemoryStore};
use swire_sync::{BindSpec, ChannelKey, StorageBackend, SyncChannel, SyncRegistry, bind_cell};

// ── MemoryStore ─────────────────────────────────────────────────────────

#[test]
fn memory_store_carries_local_changes_and_external_updates() {
    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let memory = Rc::new(MemoryStore::new());
    let _sync = SyncChannel::attach(
        &store,
        &registry,
        ChannelKey::default_channel(),
        Rc::clone(&memory),
    );

    let theme = store.cell("theme", json!("light")).unwrap();
    let _bind = bind_cell(&store, &registry, theme, BindSpec::new("theme")).unwrap();

    // Local change lands in the backend.
    store.set_json(theme, json!("dark")).unwrap();
    assert_eq!(memory.get("theme"), Some(Loadable::Value(json!("dark"))));

    // External change lands in the cell.
    memory.update("theme", json!("sepia")).unwrap();
    assert_eq!(store.loadable(theme).unwrap(), Loadable::Value(json!("sepia")));

    // External deletion resets the cell.
    memory.remove("theme").unwrap();
    assert!(!store.is_set(theme).unwrap());
    assert_eq!(store.loadable(theme).unwrap(), Loadable::Value(json!("light")));
}

#[test]
fn memory_store_error_state_degrades_cell_to_default() {
    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let memory = Rc::new(MemoryStore::new());
    let _sync = SyncChannel::attach(
        &store,
        &registry,
        ChannelKey::default_channel(),
        Rc::clone(&memory),
    );

    let cell = store.cell("c", json!("fallback")).unwrap();
    let _bind = bind_cell(&store, &registry, cell, BindSpec::new("c")).unwrap();
    store.set_json(cell, json!("live")).unwrap();

    memory.set_error("c", "record corrupted").unwrap();
    assert_eq!(
        store.loadable(cell).unwrap(),
        Loadable::Value(json!("fallback"))
    );
}

#[test]
fn detaching_the_channel_detaches_the_listener() {
    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let memory = Rc::new(MemoryStore::new());
    let sync = SyncChannel::attach(
        &store,
        &registry,
        ChannelKey::default_channel(),
        Rc::clone(&memory),
    );
    assert_eq!(memory.listener_count(), 1);

    let cell = store.cell("c", json!(0)).unwrap();
    let _bind = bind_cell(&store, &registry, cell, BindSpec::new("c")).unwrap();

    sync.detach();
    assert_eq!(memory.listener_count(), 0);

    // Updates after detach are simply not received.
    memory.update("c", json!(9)).unwrap();
    assert!(!store.is_set(cell).unwrap());
}

// ── FileStore ───────────────────────────────────────────────────────────

#[test]
fn file_store_persists_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");

    // Session one: write a preference.
    {
        let store = CellStore::new();
        let registry = SyncRegistry::new();
        let file = Rc::new(FileStore::new(&path));
        let _sync = SyncChannel::attach(
            &store,
            &registry,
            ChannelKey::named("prefs"),
            Rc::clone(&file),
        );

        let theme = store.cell("theme", json!("light")).unwrap();
        let _bind = bind_cell(
            &store,
            &registry,
            theme,
            BindSpec::new("theme").channel(ChannelKey::named("prefs")),
        )
        .unwrap();
        store.set_json(theme, json!("dark")).unwrap();
    }

    // Session two: a fresh store seeds from the file at bind time.
    {
        let store = CellStore::new();
        let registry = SyncRegistry::new();
        let file = Rc::new(FileStore::new(&path));
        let _sync = SyncChannel::attach(
            &store,
            &registry,
            ChannelKey::named("prefs"),
            Rc::clone(&file),
        );

        let theme = store.cell("theme", json!("light")).unwrap();
        let _bind = bind_cell(
            &store,
            &registry,
            theme,
            BindSpec::new("theme").channel(ChannelKey::named("prefs")),
        )
        .unwrap();

        assert_eq!(store.loadable(theme).unwrap(), Loadable::Value(json!("dark")));
        assert!(store.is_set(theme).unwrap());
    }
}

#[test]
fn file_store_sync_default_seeds_the_file_on_first_use() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prefs.json");

    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let file = Rc::new(FileStore::new(&path));
    let _sync = SyncChannel::attach(
        &store,
        &registry,
        ChannelKey::default_channel(),
        Rc::clone(&file),
    );

    let cell = store.cell("font", json!("mono")).unwrap();
    let _bind = bind_cell(
        &store,
        &registry,
        cell,
        BindSpec::new("font").sync_default(true),
    )
    .unwrap();

    // The write-back runs off the task queue.
    store.pump().unwrap();
    assert_eq!(file.read("font").unwrap(), Some(Loadable::Value(json!("mono"))));
}

#[test]
fn file_store_reset_removes_the_item() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let file = Rc::new(FileStore::new(&path));
    let _sync = SyncChannel::attach(
        &store,
        &registry,
        ChannelKey::default_channel(),
        Rc::clone(&file),
    );

    let cell = store.cell("c", json!(0)).unwrap();
    let _bind = bind_cell(&store, &registry, cell, BindSpec::new("c")).unwrap();

    store.set_json(cell, json!(5)).unwrap();
    assert!(file.read("c").unwrap().is_some());

    store.reset(cell).unwrap();
    assert_eq!(file.read("c").unwrap(), None);
}
