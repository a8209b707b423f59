#![forbid(unsafe_code)]

//! Cell kernel for statewire.
//!
//! This crate provides the reactive-state substrate the sync engine runs
//! against:
//!
//! - [`Loadable`]: tri-state value wrapper (value / error / pending) with
//!   [`Deferred`] single-threaded settlement.
//! - [`CellStore`]: independently-addressable state cells with declared
//!   defaults, atomic transactions, commit observation, and a cooperative
//!   task queue.
//! - [`CellToken`]: typed cell handles with serde at the edges.
//!
//! # Architecture
//!
//! Everything here is single-threaded and cooperatively scheduled:
//! `Rc<RefCell<..>>` interiors, no locks. Mutation is transactional —
//! observers see either the whole batch or nothing — and deferred work
//! (pending settlement, scheduled continuations) runs when the host pumps
//! the task queue, never on a timer.

pub mod commit;
pub mod error;
pub mod loadable;
pub mod store;

pub use commit::{CommitObserver, CommitRecord};
pub use error::{Result, StoreError};
pub use loadable::{Deferred, Json, LoadError, Loadable};
pub use store::{CellId, CellStore, CellToken, Transaction, WeakCellStore};
