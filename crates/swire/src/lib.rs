#![forbid(unsafe_code)]

//! Statewire public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use swire_core as core;
    #[cfg(feature = "stores")]
    pub use swire_stores as stores;
    pub use swire_sync as sync;
}

pub use swire_core::{
    CellId, CellStore, CellToken, CommitRecord, Deferred, Json, LoadError, Loadable, StoreError,
};
#[cfg(feature = "stores")]
pub use swire_stores::{FileStore, MemoryStore};
pub use swire_sync::{
    BindGuard, BindSpec, ChannelKey, Diff, InboundHandle, ItemKey, StorageBackend, SyncChannel,
    SyncError, SyncHooks, SyncRegistry, bind_cell, restore,
};
