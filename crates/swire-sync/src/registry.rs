#![forbid(unsafe_code)]

//! The registry: which cells are bound to which external items, per
//! channel, plus each channel's storage descriptor.
//!
//! # Design
//!
//! [`SyncRegistry`] is an explicitly owned context object, not a process
//! global: binding effects and the sync paths execute in unrelated parts
//! of the call graph and rendezvous on these tables, so every
//! participating component takes the registry as an argument. Cloning is
//! cheap and shares the tables; independent instances coexist in one
//! process and tear down cleanly.
//!
//! Channel tables are created lazily on first access. Registrations are
//! reference-counted per item entry: the entry is removed when its last
//! bind is released, and the registration goes with its last entry — a
//! registration exists for a cell exactly while at least one binding
//! effect for it is active.
//!
//! Storage descriptors are last-wins: registering a new one replaces the
//! old, and a stale owner cannot clear its successor (descriptors carry a
//! generation stamp for that).
//!
//! # Invariants
//!
//! 1. At most one storage descriptor per channel at a time.
//! 2. An item entry's bind count is ≥ 1 while the entry exists.
//! 3. The pending-update marker is scoped to one (channel, cell)
//!    registration and mutated only by the two sync paths.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use smallvec::SmallVec;

use swire_core::{CellId, Json, Loadable};

use crate::diff::Diff;
use crate::error::Result;
use crate::key::{ChannelKey, ItemKey};
use crate::validate::{RestoreFn, Restored};

pub(crate) type WriteFn = Rc<dyn Fn(&Diff) -> Result<()>>;
pub(crate) type ReadFn = Rc<dyn Fn(&str) -> Result<Option<Loadable<Json>>>>;

/// Per-item restore policy carried by a registration entry.
pub struct ItemBinding {
    pub(crate) restore: Rc<RestoreFn>,
    pub(crate) sync_default: bool,
}

impl ItemBinding {
    #[must_use]
    pub fn new(restore: Rc<RestoreFn>, sync_default: bool) -> Self {
        Self {
            restore,
            sync_default,
        }
    }
}

struct ItemEntry {
    key: ItemKey,
    binding: ItemBinding,
    binds: u32,
}

/// Per (channel, cell) record. The cell itself is referenced by id only —
/// lifetime is governed by the owning store.
struct Registration {
    items: SmallVec<[ItemEntry; 1]>,
    pending_update: Option<Restored>,
}

struct StorageDescriptor {
    write: Option<WriteFn>,
    read: Option<ReadFn>,
    generation: u64,
}

#[derive(Default)]
struct ChannelTable {
    registrations: AHashMap<CellId, Registration>,
    storage: Option<StorageDescriptor>,
}

#[derive(Default)]
struct RegistryInner {
    channels: AHashMap<ChannelKey, ChannelTable>,
    next_generation: u64,
}

/// Shared registry context. Cloning shares the tables.
#[derive(Clone, Default)]
pub struct SyncRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("SyncRegistry")
            .field("channels", &inner.channels.len())
            .finish()
    }
}

impl SyncRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channel tables that have been touched.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.borrow().channels.len()
    }

    /// Number of live registrations under a channel.
    #[must_use]
    pub fn registration_count(&self, channel: &ChannelKey) -> usize {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .map_or(0, |table| table.registrations.len())
    }

    /// Whether a cell currently has a registration under a channel.
    #[must_use]
    pub fn is_registered(&self, channel: &ChannelKey, cell: CellId) -> bool {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .is_some_and(|table| table.registrations.contains_key(&cell))
    }

    // ── Storage descriptors ─────────────────────────────────────────

    /// Install a channel's storage descriptor (last registration wins).
    /// Returns the generation stamp the owner needs for [`clear_storage`].
    ///
    /// [`clear_storage`]: Self::clear_storage
    pub(crate) fn set_storage(
        &self,
        channel: &ChannelKey,
        write: Option<WriteFn>,
        read: Option<ReadFn>,
    ) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let table = inner.channels.entry(channel.clone()).or_default();
        table.storage = Some(StorageDescriptor {
            write,
            read,
            generation,
        });
        generation
    }

    /// Remove the channel's storage descriptor, but only if it is still
    /// the one installed under `generation`.
    pub(crate) fn clear_storage(&self, channel: &ChannelKey, generation: u64) {
        let mut inner = self.inner.borrow_mut();
        if let Some(table) = inner.channels.get_mut(channel)
            && table
                .storage
                .as_ref()
                .is_some_and(|desc| desc.generation == generation)
        {
            table.storage = None;
        }
    }

    pub(crate) fn write_fn(&self, channel: &ChannelKey) -> Option<WriteFn> {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .and_then(|table| table.storage.as_ref())
            .and_then(|desc| desc.write.clone())
    }

    pub(crate) fn read_fn(&self, channel: &ChannelKey) -> Option<ReadFn> {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .and_then(|table| table.storage.as_ref())
            .and_then(|desc| desc.read.clone())
    }

    // ── Registrations ───────────────────────────────────────────────

    /// Register (or re-register) a cell's binding to an item key.
    pub(crate) fn register(
        &self,
        channel: &ChannelKey,
        cell: CellId,
        key: &str,
        binding: ItemBinding,
    ) {
        let mut inner = self.inner.borrow_mut();
        let table = inner.channels.entry(channel.clone()).or_default();
        let registration = table.registrations.entry(cell).or_insert_with(|| Registration {
            items: SmallVec::new(),
            pending_update: None,
        });
        match registration.items.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                // Rebinding the same key updates the policy.
                entry.binding = binding;
                entry.binds += 1;
            }
            None => registration.items.push(ItemEntry {
                key: key.to_owned(),
                binding,
                binds: 1,
            }),
        }
    }

    /// Release one bind of (cell, key). The entry goes at zero binds; the
    /// registration goes with its last entry.
    pub(crate) fn unregister(&self, channel: &ChannelKey, cell: CellId, key: &str) {
        let mut inner = self.inner.borrow_mut();
        let Some(table) = inner.channels.get_mut(channel) else {
            return;
        };
        let Some(registration) = table.registrations.get_mut(&cell) else {
            return;
        };
        if let Some(pos) = registration.items.iter().position(|entry| entry.key == key) {
            let entry = &mut registration.items[pos];
            entry.binds = entry.binds.saturating_sub(1);
            if entry.binds == 0 {
                registration.items.remove(pos);
            }
        }
        if registration.items.is_empty() {
            table.registrations.remove(&cell);
        }
    }

    /// Item keys bound to a cell, with each entry's `sync_default` flag.
    pub(crate) fn items_of(&self, channel: &ChannelKey, cell: CellId) -> Vec<(ItemKey, bool)> {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .and_then(|table| table.registrations.get(&cell))
            .map(|registration| {
                registration
                    .items
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.binding.sync_default))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fan-out lookup: every (cell, restore) whose registration binds
    /// `key` under this channel.
    pub(crate) fn bindings_for_key(
        &self,
        channel: &ChannelKey,
        key: &str,
    ) -> Vec<(CellId, Rc<RestoreFn>)> {
        self.inner
            .borrow()
            .channels
            .get(channel)
            .map(|table| {
                table
                    .registrations
                    .iter()
                    .filter_map(|(cell, registration)| {
                        registration
                            .items
                            .iter()
                            .find(|entry| entry.key == key)
                            .map(|entry| (*cell, Rc::clone(&entry.binding.restore)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Pending-update markers ──────────────────────────────────────

    pub(crate) fn set_marker(&self, channel: &ChannelKey, cell: CellId, marker: Restored) {
        let mut inner = self.inner.borrow_mut();
        if let Some(registration) = inner
            .channels
            .get_mut(channel)
            .and_then(|table| table.registrations.get_mut(&cell))
        {
            registration.pending_update = Some(marker);
        }
    }

    /// Take (and thereby clear) the cell's pending-update marker.
    pub(crate) fn take_marker(&self, channel: &ChannelKey, cell: CellId) -> Option<Restored> {
        let mut inner = self.inner.borrow_mut();
        inner
            .channels
            .get_mut(channel)
            .and_then(|table| table.registrations.get_mut(&cell))
            .and_then(|registration| registration.pending_update.take())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
