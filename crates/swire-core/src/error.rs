#![forbid(unsafe_code)]

//! Kernel error type.

use thiserror::Error;

use crate::store::CellId;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown cell id {0:?}")]
    UnknownCell(CellId),

    #[error("duplicate cell label: {0}")]
    DuplicateCell(String),

    #[error("transaction opened while commit observers are running")]
    ReentrantTransact,

    #[error("cell codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A commit observer or scheduled task failed. The payload is opaque to
    /// the kernel; sync layers put their own error types here.
    #[error("observer error: {0}")]
    Observer(Box<dyn std::error::Error>),
}

impl StoreError {
    /// Wrap an observer/task failure for propagation out of `transact` or
    /// `pump`.
    #[must_use]
    pub fn observer(err: impl std::error::Error + 'static) -> Self {
        Self::Observer(Box::new(err))
    }
}
