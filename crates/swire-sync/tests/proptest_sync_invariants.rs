//! Property-based invariant tests for the sync engine.
//!
//! These verify structural invariants that must hold for **any** payload:
//!
//! 1. The wire codec round-trips settled diffs exactly, preserving order.
//! 2. Echo suppression: an inbound update never produces an outbound
//!    entry for the same item key in the commit it causes.
//! 3. Outbound completeness: every cell changed in a commit appears in
//!    the flushed diff exactly once per bound item key — and nothing else
//!    does.
//! 4. A restore miss resets the cell; a restore hit adopts the value.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::json;

use swire_core::{CellStore, Json, Loadable};
use swire_sync::{
    BindSpec, ChannelKey, Diff, InboundHandle, SyncChannel, SyncHooks, SyncRegistry, bind_cell,
    restore,
};

// ── Helpers ─────────────────────────────────────────────────────────────

/// Scalar JSON payloads; nesting adds nothing to these invariants.
fn json_leaf() -> impl Strategy<Value = Json> {
    prop_oneof![
        Just(Json::Null),
        any::<bool>().prop_map(Json::from),
        any::<i64>().prop_map(Json::from),
        "[a-z]{0,8}".prop_map(Json::from),
    ]
}

fn item_key() -> impl Strategy<Value = String> {
    "[a-z]{1,6}".prop_map(String::from)
}

/// A store + registry wired to hooks that record every flushed diff and
/// expose the inbound handle.
struct Harness {
    store: CellStore,
    registry: SyncRegistry,
    writes: Rc<RefCell<Vec<Diff>>>,
    inbound: InboundHandle,
    _channel: SyncChannel,
}

fn harness() -> Harness {
    let store = CellStore::new();
    let registry = SyncRegistry::new();
    let writes: Rc<RefCell<Vec<Diff>>> = Rc::default();
    let sink = Rc::clone(&writes);
    let handle_slot: Rc<RefCell<Option<InboundHandle>>> = Rc::default();
    let slot = Rc::clone(&handle_slot);

    let channel = SyncChannel::attach_with(
        &store,
        &registry,
        ChannelKey::default_channel(),
        SyncHooks::new()
            .write(move |diff| {
                sink.borrow_mut().push(diff.clone());
                Ok(())
            })
            .listen(move |inbound| {
                slot.borrow_mut().replace(inbound);
                None
            }),
    );

    let inbound = handle_slot.borrow_mut().take().expect("listen hook ran");
    Harness {
        store,
        registry,
        writes,
        inbound,
        _channel: channel,
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Wire codec round-trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn wire_codec_round_trips_settled_diffs(
        entries in proptest::collection::vec((item_key(), proptest::option::of(json_leaf())), 0..16),
    ) {
        let mut diff = Diff::new();
        for (key, value) in &entries {
            diff.push(key.clone(), value.clone().map(Loadable::Value));
        }

        let decoded = Diff::from_wire(&diff.to_wire()).unwrap();
        prop_assert_eq!(&decoded, &diff, "decode(encode(d)) must equal d");

        let original_keys: Vec<_> = diff.iter().map(|(k, _)| k.to_owned()).collect();
        let decoded_keys: Vec<_> = decoded.iter().map(|(k, _)| k.to_owned()).collect();
        prop_assert_eq!(decoded_keys, original_keys, "order must be preserved");
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Echo suppression for arbitrary inbound values
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn inbound_update_never_echoes(value in json_leaf()) {
        let h = harness();
        let cell = h.store.cell("cell", json!("default")).unwrap();
        let _bind = bind_cell(&h.store, &h.registry, cell, BindSpec::new("k")).unwrap();

        h.inbound
            .apply(&Diff::single("k", Some(Loadable::Value(value))))
            .unwrap();

        for diff in h.writes.borrow().iter() {
            prop_assert!(
                diff.find("k").is_none(),
                "inbound-caused flush must not contain the item key, got {:?}",
                diff
            );
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Outbound diff completeness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn flushed_diff_covers_exactly_the_changed_cells(
        chosen in proptest::collection::vec(any::<bool>(), 4),
        values in proptest::collection::vec(json_leaf(), 4),
    ) {
        let h = harness();
        let keys = ["ka", "kb", "kc", "kd"];
        let mut cells = Vec::new();
        let mut guards = Vec::new();
        for key in keys {
            let cell = h.store.cell(key, json!("untouched-default")).unwrap();
            guards.push(bind_cell(&h.store, &h.registry, cell, BindSpec::new(key)).unwrap());
            cells.push(cell);
        }

        h.store
            .transact(|tx| {
                for i in 0..4 {
                    if chosen[i] {
                        tx.set_json(cells[i], values[i].clone());
                    }
                }
                Ok(())
            })
            .unwrap();

        let expected: Vec<&str> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| chosen[*i])
            .map(|(_, k)| *k)
            .collect();

        let writes = h.writes.borrow();
        if expected.is_empty() {
            // No change, no commit, no flush.
            prop_assert!(writes.is_empty());
        } else {
            prop_assert_eq!(writes.len(), 1, "exactly one flush per commit");
            let diff = &writes[0];
            let mut flushed: Vec<&str> = diff.iter().map(|(k, _)| k).collect();
            let mut expected_sorted = expected.clone();
            flushed.sort_unstable();
            expected_sorted.sort_unstable();
            prop_assert_eq!(flushed, expected_sorted, "one entry per changed bound cell");
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Restore outcome decides adopt-vs-reset
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn restore_outcome_decides_adoption(value in json_leaf()) {
        let h = harness();
        let cell = h.store.cell("cell", json!("the-default")).unwrap();
        let allowed = vec![json!("light"), json!("dark"), json!(42)];
        let _bind = bind_cell(
            &h.store,
            &h.registry,
            cell,
            BindSpec::new("k").restore(restore::one_of(allowed.clone())),
        )
        .unwrap();

        h.inbound
            .apply(&Diff::single("k", Some(Loadable::Value(value.clone()))))
            .unwrap();

        if allowed.contains(&value) {
            prop_assert_eq!(h.store.loadable(cell).unwrap(), Loadable::Value(value));
            prop_assert!(h.store.is_set(cell).unwrap());
        } else {
            prop_assert_eq!(
                h.store.loadable(cell).unwrap(),
                Loadable::Value(json!("the-default"))
            );
            prop_assert!(!h.store.is_set(cell).unwrap(), "miss must reset, not adopt");
        }
    }
}
