#![forbid(unsafe_code)]

//! Inbound sync: apply an externally-delivered diff to the bound cells as
//! one atomic transaction.
//!
//! # Design
//!
//! Plan first, mutate second. Every diff entry fans out to every
//! registration binding that item key; each (cell, payload) pair is
//! validated into a planned operation. A pending validation outcome aborts
//! the whole delivery before any marker is written or any cell touched —
//! cells cannot adopt an in-flight computation from this path.
//!
//! Markers are recorded before the transaction commits: the commit
//! triggers the outbound flush synchronously, and the flush must see them
//! to suppress the echo.
//!
//! Inbound error-state values degrade to "reset to default" rather than
//! raising. Cells cannot yet durably represent an error state, and
//! crashing the reactive graph on one bad external value is worse than
//! falling back; richer error-state support would change this.

use tracing::{debug, warn};

use swire_core::{CellId, CellStore, Json};

use crate::diff::Diff;
use crate::error::{Result, SyncError};
use crate::key::ChannelKey;
use crate::registry::SyncRegistry;
use crate::validate::{Restored, Validated, validate};

enum PlannedOp {
    Set(Json),
    Reset,
}

/// Handle given to a channel's listen mechanism; calling [`apply`] is how
/// external changes enter the engine.
///
/// [`apply`]: Self::apply
pub struct InboundHandle {
    store: CellStore,
    registry: SyncRegistry,
    channel: ChannelKey,
}

impl Clone for InboundHandle {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            channel: self.channel.clone(),
        }
    }
}

impl std::fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandle")
            .field("channel", &self.channel)
            .finish()
    }
}

impl InboundHandle {
    pub(crate) fn new(store: CellStore, registry: SyncRegistry, channel: ChannelKey) -> Self {
        Self {
            store,
            registry,
            channel,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    /// Apply one externally-delivered diff atomically. On error, no cell
    /// was mutated and no marker recorded.
    pub fn apply(&self, diff: &Diff) -> Result<()> {
        let mut plan: Vec<(CellId, PlannedOp, Restored)> = Vec::new();

        for (key, payload) in diff.iter() {
            for (cell, restore) in self.registry.bindings_for_key(&self.channel, key) {
                match payload {
                    Some(raw) => match validate(raw, restore.as_ref()) {
                        Validated::Settled(Restored::Value(value)) => {
                            plan.push((cell, PlannedOp::Set(value.clone()), Restored::Value(value)));
                        }
                        Validated::Settled(Restored::Default) => {
                            plan.push((cell, PlannedOp::Reset, Restored::Default));
                        }
                        Validated::Error(e) => {
                            // Stopgap: degrade to the declared default.
                            warn!(
                                channel = %self.channel,
                                key,
                                error = e.message(),
                                "inbound error-state downgraded to reset"
                            );
                            plan.push((cell, PlannedOp::Reset, Restored::Default));
                        }
                        Validated::Pending(_) => {
                            return Err(SyncError::PendingInbound {
                                key: key.to_owned(),
                            });
                        }
                    },
                    None => plan.push((cell, PlannedOp::Reset, Restored::Default)),
                }
            }
        }

        debug!(channel = %self.channel, entries = diff.len(), ops = plan.len(), "inbound apply");

        // Markers first: the commit below triggers the outbound flush,
        // which must observe them.
        for (cell, _, marker) in &plan {
            self.registry.set_marker(&self.channel, *cell, marker.clone());
        }

        self.store
            .transact(|tx| {
                for (cell, op, _) in &plan {
                    match op {
                        PlannedOp::Set(value) => tx.set_json(*cell, value.clone()),
                        PlannedOp::Reset => tx.reset(*cell),
                    }
                }
                Ok(())
            })
            .map_err(SyncError::from_commit)
    }
}
