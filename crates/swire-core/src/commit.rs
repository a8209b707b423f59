#![forbid(unsafe_code)]

//! Commit observation: per-commit records and RAII observer guards.
//!
//! A [`CommitRecord`] is the consistent, point-in-time view handed to
//! observers after a transaction lands: the commit sequence number plus the
//! set of cells whose value or set-status actually changed. Observers read
//! current cell state through the store handle they are given; since the
//! kernel is single-threaded and observers may not open transactions, that
//! state is exactly the committed snapshot.
//!
//! # Invariants
//!
//! 1. Observers run in registration order.
//! 2. An observer is never invoked after its [`CommitObserver`] guard is
//!    dropped.
//! 3. `modified` lists each changed cell exactly once, in first-touch
//!    order.

use crate::store::CellId;

/// The consistent view of one committed transaction.
#[derive(Clone, Debug)]
pub struct CommitRecord {
    seq: u64,
    modified: Vec<CellId>,
}

impl CommitRecord {
    pub(crate) fn new(seq: u64, modified: Vec<CellId>) -> Self {
        Self { seq, modified }
    }

    /// Monotonic commit sequence number (1-based).
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Cells whose value or set-status changed in this commit, in
    /// first-touch order, deduplicated.
    #[must_use]
    pub fn modified(&self) -> &[CellId] {
        &self.modified
    }

    #[must_use]
    pub fn contains(&self, id: CellId) -> bool {
        self.modified.contains(&id)
    }
}

/// RAII guard for a commit observer. Dropping it unregisters the observer
/// before the next commit.
pub struct CommitObserver {
    pub(crate) unregister: Option<Box<dyn FnOnce()>>,
}

impl CommitObserver {
    /// Detach without unregistering: the observer lives as long as the
    /// store does.
    pub fn leak(mut self) {
        self.unregister = None;
    }
}

impl Drop for CommitObserver {
    fn drop(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl std::fmt::Debug for CommitObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitObserver")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}
