#![forbid(unsafe_code)]

//! Outbound sync: turn a committed snapshot into a per-channel diff and
//! hand it to the channel's write function.
//!
//! Runs as a commit observer, once per committed snapshot per attached
//! channel. For each modified cell with a registration in the channel:
//!
//! 1. Take (clear) the pending-update marker.
//! 2. **Echo suppression**: if the current value is a value-state exactly
//!    equal to the marker's value, or the cell is unset and the marker is
//!    the default sentinel, the change originated from an inbound update —
//!    skip the cell. The marker is cleared either way.
//! 3. Otherwise emit one entry per bound item key: the cell's current
//!    loadable when set (or when the binding syncs its default), an absent
//!    value when unset with `sync_default` off.
//!
//! The write function is invoked exactly once per triggering commit, even
//! when the resulting diff is empty. Write failures propagate
//! synchronously to the caller of the committing `transact`; there are no
//! retries here.

use tracing::{debug, trace};

use swire_core::{CellStore, CommitRecord, Loadable};

use crate::diff::Diff;
use crate::error::Result;
use crate::key::ChannelKey;
use crate::registry::SyncRegistry;
use crate::validate::Restored;

pub(crate) fn flush_commit(
    store: &CellStore,
    registry: &SyncRegistry,
    channel: &ChannelKey,
    record: &CommitRecord,
) -> Result<()> {
    let Some(write) = registry.write_fn(channel) else {
        // Descriptor torn down: the subscription is a no-op from here on.
        trace!(%channel, seq = record.seq(), "no storage descriptor, skipping flush");
        return Ok(());
    };

    let mut diff = Diff::new();
    for &cell in record.modified() {
        if !registry.is_registered(channel, cell) {
            continue;
        }
        let loadable = store.loadable(cell)?;
        let is_set = store.is_set(cell)?;

        // Marker is cleared whether or not it suppresses this cell.
        if let Some(marker) = registry.take_marker(channel, cell) {
            let suppressed = match &marker {
                Restored::Value(applied) => {
                    matches!(&loadable, Loadable::Value(current) if current == applied)
                }
                Restored::Default => !is_set,
            };
            if suppressed {
                trace!(%channel, ?cell, "suppressing inbound echo");
                continue;
            }
        }

        for (key, sync_default) in registry.items_of(channel, cell) {
            if is_set || sync_default {
                diff.push(key, Some(loadable.clone()));
            } else {
                diff.push(key, None);
            }
        }
    }

    debug!(%channel, seq = record.seq(), entries = diff.len(), "outbound flush");
    write(&diff)
}
