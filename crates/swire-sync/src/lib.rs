#![forbid(unsafe_code)]

//! Diff-based bidirectional synchronization between statewire cells and
//! external storage.
//!
//! # Overview
//!
//! This crate keeps a set of in-memory reactive cells (a
//! [`swire_core::CellStore`]) consistent with one or more external
//! storage backends. Each cell can be bound to one or more external item
//! keys; backends are pluggable (any [`StorageBackend`] or raw
//! [`SyncHooks`]); multiple independent channels coexist, each with its
//! own registry partition and storage descriptor.
//!
//! The moving parts:
//!
//! - [`SyncRegistry`]: which cells are bound to which item keys, per
//!   channel, with in-flight update markers. An owned context object —
//!   pass it to everything; there is no process-wide global.
//! - [`validate`]: the pure pipeline turning untyped external payloads
//!   into typed outcomes or the default sentinel.
//! - Outbound sync: a commit observer that turns each committed snapshot
//!   into a per-channel [`Diff`], suppressing self-inflicted echoes.
//! - Inbound sync: [`InboundHandle::apply`] validates an external diff
//!   and applies it to the bound cells in one atomic transaction.
//! - [`bind_cell`]: the per-(cell, item key) binding effect — register,
//!   seed from storage, optionally write the default back.
//!
//! # Consistency model
//!
//! Single-threaded and cooperative. Outbound diffs are flushed atomically
//! per commit, never partially; inbound diffs apply in one transaction.
//! There is no cross-channel consistency, no conflict resolution beyond
//! last-write-wins per item key, and no retry — a backend that fails
//! reports it to whoever triggered the operation.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use serde_json::json;
//! use swire_core::CellStore;
//! use swire_sync::{BindSpec, ChannelKey, SyncChannel, SyncHooks, SyncRegistry, bind_cell};
//!
//! let store = CellStore::new();
//! let registry = SyncRegistry::new();
//! let theme = store.cell("theme", json!("light")).unwrap();
//!
//! // A write-only channel that records diffs.
//! let log = Rc::new(std::cell::RefCell::new(Vec::new()));
//! let sink = Rc::clone(&log);
//! let channel = SyncChannel::attach_with(
//!     &store,
//!     &registry,
//!     ChannelKey::named("prefs"),
//!     SyncHooks::new().write(move |diff| {
//!         sink.borrow_mut().push(diff.clone());
//!         Ok(())
//!     }),
//! );
//!
//! let _bind = bind_cell(
//!     &store,
//!     &registry,
//!     theme,
//!     BindSpec::new("theme").channel(ChannelKey::named("prefs")),
//! )
//! .unwrap();
//!
//! store.set_json(theme, json!("dark")).unwrap();
//! assert_eq!(log.borrow().len(), 1);
//! drop(channel);
//! ```

pub mod bind;
pub mod channel;
pub mod diff;
pub mod error;
pub mod inbound;
pub mod key;
pub mod outbound;
pub mod registry;
pub mod validate;

pub use bind::{BindGuard, BindSpec, bind_cell};
pub use channel::{ListenTeardown, StorageBackend, SyncChannel, SyncHooks};
pub use diff::{Diff, decode_loadable, encode_loadable};
pub use error::{Result, SyncError};
pub use inbound::InboundHandle;
pub use key::{ChannelKey, ItemKey};
pub use registry::{ItemBinding, SyncRegistry};
pub use validate::{RestoreFn, Restored, Validated, restore, validate};
