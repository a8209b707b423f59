#![forbid(unsafe_code)]

//! JSON-file storage backend for cross-session persistence.
//!
//! The file holds a single object mapping item keys to tri-state
//! envelopes:
//!
//! ```json
//! {
//!   "items": {
//!     "theme": {"state": "value", "value": "dark"},
//!     "draft": {"state": "error", "message": "corrupt"}
//!   }
//! }
//! ```
//!
//! Each write loads, merges, and rewrites the whole file — fine for
//! settings-sized state, wrong for anything bigger. Pending loadables are
//! not persisted (a value mid-computation cannot be durably represented);
//! write skips them and keeps whatever the file already had for that key.
//!
//! # Failure Modes
//!
//! - I/O failures surface as [`SyncError::Backend`] and propagate to the
//!   triggering operation.
//! - A file that is not valid JSON, or an entry that is not a valid
//!   envelope, is a configuration error ([`SyncError::MalformedPayload`])
//!   — fatal at bind time, by design.
//!
//! [`SyncError::Backend`]: swire_sync::SyncError
//! [`SyncError::MalformedPayload`]: swire_sync::SyncError

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, json};

use swire_core::{Json, Loadable};
use swire_sync::{Diff, Result, StorageBackend, SyncError, decode_loadable, encode_loadable};

/// File-backed store of wire envelopes. Stateless between calls: every
/// operation round-trips through the file.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of persisted items (0 when the file does not exist yet).
    pub fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.load()?.is_empty())
    }

    fn load(&self) -> Result<Map<String, Json>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(SyncError::backend(err)),
        };
        let parsed: Json = serde_json::from_str(&text).map_err(|err| {
            SyncError::malformed("(file)", format!("not valid JSON: {err}"))
        })?;
        match parsed.get("items") {
            Some(Json::Object(items)) => Ok(items.clone()),
            _ => Err(SyncError::malformed(
                "(file)",
                "missing top-level \"items\" object",
            )),
        }
    }

    fn save(&self, items: Map<String, Json>) -> Result<()> {
        let text = serde_json::to_string_pretty(&json!({ "items": items }))
            .map_err(|err| SyncError::malformed("(file)", err.to_string()))?;
        fs::write(&self.path, text).map_err(SyncError::backend)
    }
}

impl StorageBackend for FileStore {
    fn write(&self, diff: &Diff) -> Result<()> {
        let mut items = self.load()?;
        for (key, value) in diff.iter() {
            match value {
                Some(loadable) if loadable.is_pending() => {}
                Some(loadable) => {
                    items.insert(key.to_owned(), encode_loadable(loadable));
                }
                None => {
                    items.remove(key);
                }
            }
        }
        self.save(items)
    }

    fn read(&self, key: &str) -> Result<Option<Loadable<Json>>> {
        let items = self.load()?;
        match items.get(key) {
            Some(envelope) => Ok(Some(decode_loadable(envelope, key)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
