#![forbid(unsafe_code)]

//! The binding effect: per-(cell, item key) setup.
//!
//! Binding a cell registers it in the channel's table, seeds it from the
//! channel's storage if a read function is available, and — when the
//! binding syncs its default — schedules a deferred write-back so the
//! default becomes durably persisted on first use.
//!
//! The write-back is a continuation on the store's task queue, not a
//! timer: it runs after the current task, once the cell's initial
//! resolution has had a chance to settle. If the cell is still pending
//! when the continuation runs, it re-arms on settlement.
//!
//! # Failure Modes
//!
//! - A read function error (malformed stored payload) or a stored
//!   error-state payload is fatal to this cell's initialization: the
//!   registration increment is rolled back and the error returned.
//! - Seeding is fallible only at bind time; later inbound traffic for the
//!   same key goes through [`InboundHandle::apply`].
//!
//! [`InboundHandle::apply`]: crate::inbound::InboundHandle::apply

use std::rc::Rc;

use tracing::{debug, trace};

use swire_core::{CellId, CellStore, Loadable, StoreError};

use crate::diff::Diff;
use crate::error::{Result, SyncError};
use crate::key::{ChannelKey, ItemKey};
use crate::registry::{ItemBinding, SyncRegistry};
use crate::validate::{RestoreFn, Restored, Validated, restore, validate};

/// How to bind one cell to one external item key.
pub struct BindSpec {
    channel: ChannelKey,
    item_key: ItemKey,
    restore: Rc<RestoreFn>,
    sync_default: bool,
}

impl BindSpec {
    /// Bind under the default channel with the identity restore and
    /// `sync_default` off.
    #[must_use]
    pub fn new(item_key: impl Into<ItemKey>) -> Self {
        Self {
            channel: ChannelKey::default_channel(),
            item_key: item_key.into(),
            restore: restore::identity(),
            sync_default: false,
        }
    }

    #[must_use]
    pub fn channel(mut self, channel: ChannelKey) -> Self {
        self.channel = channel;
        self
    }

    #[must_use]
    pub fn restore(mut self, restore: Rc<RestoreFn>) -> Self {
        self.restore = restore;
        self
    }

    /// When on, the cell's default value is written out instead of an
    /// absent entry, and is persisted once at bind time.
    #[must_use]
    pub fn sync_default(mut self, sync_default: bool) -> Self {
        self.sync_default = sync_default;
        self
    }
}

/// RAII guard for one active binding. Dropping it releases the
/// registration entry (reference-counted; the registration itself goes
/// with its last entry).
pub struct BindGuard {
    registry: SyncRegistry,
    channel: ChannelKey,
    cell: CellId,
    item_key: ItemKey,
}

impl Drop for BindGuard {
    fn drop(&mut self) {
        self.registry
            .unregister(&self.channel, self.cell, &self.item_key);
    }
}

impl std::fmt::Debug for BindGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGuard")
            .field("channel", &self.channel)
            .field("cell", &self.cell)
            .field("item_key", &self.item_key)
            .finish()
    }
}

/// Bind a cell to an external item key. Returns the guard keeping the
/// registration alive.
pub fn bind_cell(
    store: &CellStore,
    registry: &SyncRegistry,
    cell: CellId,
    spec: BindSpec,
) -> Result<BindGuard> {
    let BindSpec {
        channel,
        item_key,
        restore,
        sync_default,
    } = spec;

    registry.register(
        &channel,
        cell,
        &item_key,
        ItemBinding::new(Rc::clone(&restore), sync_default),
    );
    let guard = BindGuard {
        registry: registry.clone(),
        channel: channel.clone(),
        cell,
        item_key: item_key.clone(),
    };
    trace!(%channel, ?cell, key = %item_key, sync_default, "bound cell");

    // Seed from storage. A failure aborts this cell's initialization; the
    // guard drop rolls the registration increment back.
    if let Some(read) = registry.read_fn(&channel) {
        seed(store, cell, &item_key, restore.as_ref(), |key| read(key))?;
    }

    if sync_default && registry.write_fn(&channel).is_some() {
        schedule_default_write_back(store, registry.clone(), channel, cell, item_key);
    }

    Ok(guard)
}

fn seed(
    store: &CellStore,
    cell: CellId,
    key: &str,
    restore: &RestoreFn,
    read: impl Fn(&str) -> Result<Option<Loadable<swire_core::Json>>>,
) -> Result<()> {
    let Some(raw) = read(key)? else {
        // Nothing stored: the declared default stands.
        return Ok(());
    };
    match validate(&raw, restore) {
        Validated::Settled(Restored::Value(value)) => {
            debug!(?cell, key, "seeding cell from storage");
            store
                .transact(|tx| {
                    tx.set_json(cell, value.clone());
                    Ok(())
                })
                .map_err(SyncError::from_commit)
        }
        Validated::Settled(Restored::Default) => Ok(()),
        Validated::Error(e) => Err(SyncError::SeedError {
            key: key.to_owned(),
            message: e.message().to_owned(),
        }),
        Validated::Pending(deferred) => {
            debug!(?cell, key, "seeding cell with still-resolving computation");
            store
                .transact(|tx| {
                    tx.set_loadable(cell, Loadable::Pending(deferred.clone()));
                    Ok(())
                })
                .map_err(SyncError::from_commit)
        }
    }
}

/// Queue a write-back of the cell's settled value under `key`, re-arming
/// while the cell is still pending. Skips error states (they cannot be
/// durably persisted) and channels whose descriptor has been removed.
fn schedule_default_write_back(
    store: &CellStore,
    registry: SyncRegistry,
    channel: ChannelKey,
    cell: CellId,
    key: ItemKey,
) {
    store.schedule(move |s| {
        let loadable = s.loadable(cell)?;
        match loadable {
            Loadable::Value(_) => {
                if let Some(write) = registry.write_fn(&channel) {
                    trace!(%channel, ?cell, key = %key, "writing back settled default");
                    let diff = Diff::single(key.clone(), Some(loadable));
                    write(&diff).map_err(StoreError::from)?;
                }
                Ok(())
            }
            Loadable::Pending(deferred) => {
                let weak = s.downgrade();
                deferred.on_resolve(move |_| {
                    if let Some(strong) = weak.upgrade() {
                        schedule_default_write_back(&strong, registry, channel, cell, key);
                    }
                });
                Ok(())
            }
            Loadable::Error(_) => Ok(()),
        }
    });
}
