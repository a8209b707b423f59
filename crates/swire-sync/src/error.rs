#![forbid(unsafe_code)]

//! Sync error taxonomy.
//!
//! Three families, with distinct propagation policies:
//!
//! - **Configuration errors** ([`SyncError::MalformedPayload`],
//!   [`SyncError::SeedError`]): fatal, thrown synchronously out of the
//!   binding step, aborting that cell's initialization.
//! - **Unsupported-state errors** ([`SyncError::PendingInbound`]): fatal,
//!   thrown out of the inbound transaction before any cell is mutated.
//! - **Backend failures** ([`SyncError::Backend`]): not handled here; they
//!   propagate unmodified to the caller of the triggering operation (the
//!   committing `transact`, or the backend's listen callback).
//!
//! Inbound error-state values and restore misses are NOT errors: they
//! degrade silently to "reset to default" so one bad external value cannot
//! take down the whole reactive graph.

use thiserror::Error;

use swire_core::StoreError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed stored payload for item {key:?}: {reason}")]
    MalformedPayload { key: String, reason: String },

    #[error("stored error-state for item {key:?} during bind: {message}")]
    SeedError { key: String, message: String },

    #[error(
        "inbound update for item {key:?} is still pending; a cell cannot adopt an in-flight value from a diff"
    )]
    PendingInbound { key: String },

    #[error("storage backend failure: {0}")]
    Backend(Box<dyn std::error::Error>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    #[must_use]
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            key: key.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn backend(err: impl std::error::Error + 'static) -> Self {
        Self::Backend(Box::new(err))
    }

    /// Unwrap a kernel commit error back into the sync error that caused
    /// it, if one did. Outbound flushes run as commit observers, so their
    /// failures come back from `transact` wrapped in
    /// [`StoreError::Observer`].
    #[must_use]
    pub fn from_commit(err: StoreError) -> Self {
        match err {
            StoreError::Observer(boxed) => match boxed.downcast::<SyncError>() {
                Ok(sync) => *sync,
                Err(other) => Self::Store(StoreError::Observer(other)),
            },
            other => Self::Store(other),
        }
    }
}

impl From<SyncError> for StoreError {
    fn from(err: SyncError) -> Self {
        StoreError::observer(err)
    }
}
