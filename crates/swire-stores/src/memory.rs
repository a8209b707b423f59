#![forbid(unsafe_code)]

//! In-memory storage backend with push support.
//!
//! The engine-facing half ([`StorageBackend`]) applies writes silently:
//! diffs authored by the sync engine must not boomerang back as inbound
//! deliveries. The application-facing half (`update`, `update_many`,
//! `remove`, `set_error`, `push`) models changes of external origin — it
//! mutates the map AND notifies every attached listener, propagating the
//! first inbound-apply error to the caller.
//!
//! Useful as the reference backend in tests and for same-process channels
//! (two stores syncing through one `MemoryStore`).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use swire_core::{Json, Loadable};
use swire_sync::{Diff, InboundHandle, ListenTeardown, Result, StorageBackend};

struct MemoryInner {
    items: AHashMap<String, Loadable<Json>>,
    listeners: Vec<(u64, InboundHandle)>,
    next_listener: u64,
}

/// Shared in-memory key-value store of tri-state payloads.
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(MemoryInner {
                items: AHashMap::new(),
                listeners: Vec::new(),
                next_listener: 1,
            })),
        }
    }

    // ── Inspection ──────────────────────────────────────────────────

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Loadable<Json>> {
        self.inner.borrow().items.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.borrow().items.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    // ── External-origin mutation ────────────────────────────────────

    /// Store a value as if an external writer changed it, and notify
    /// listeners.
    pub fn update(&self, key: impl Into<String>, value: Json) -> Result<()> {
        let key = key.into();
        self.inner
            .borrow_mut()
            .items
            .insert(key.clone(), Loadable::Value(value.clone()));
        self.notify(&Diff::single(key, Some(Loadable::Value(value))))
    }

    /// Batch form of [`update`](Self::update); `None` removes the item.
    pub fn update_many(
        &self,
        entries: impl IntoIterator<Item = (String, Option<Json>)>,
    ) -> Result<()> {
        let mut diff = Diff::new();
        {
            let mut inner = self.inner.borrow_mut();
            for (key, value) in entries {
                match value {
                    Some(value) => {
                        inner
                            .items
                            .insert(key.clone(), Loadable::Value(value.clone()));
                        diff.push(key, Some(Loadable::Value(value)));
                    }
                    None => {
                        inner.items.remove(&key);
                        diff.push(key, None);
                    }
                }
            }
        }
        self.notify(&diff)
    }

    /// Remove an item as if an external writer deleted it, and notify
    /// listeners with an absent entry.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.inner.borrow_mut().items.remove(key);
        self.notify(&Diff::single(key, None))
    }

    /// Store an error state (a corrupt or unreadable record) and notify
    /// listeners.
    pub fn set_error(&self, key: impl Into<String>, message: impl Into<String>) -> Result<()> {
        let key = key.into();
        let loadable: Loadable<Json> = Loadable::error(message.into());
        self.inner
            .borrow_mut()
            .items
            .insert(key.clone(), loadable.clone());
        self.notify(&Diff::single(key, Some(loadable)))
    }

    /// Push an arbitrary diff to listeners without touching the map. For
    /// tests that need full control over the delivered payload states.
    pub fn push(&self, diff: &Diff) -> Result<()> {
        self.notify(diff)
    }

    fn notify(&self, diff: &Diff) -> Result<()> {
        let handles: Vec<InboundHandle> = {
            let inner = self.inner.borrow();
            inner
                .listeners
                .iter()
                .map(|(_, handle)| handle.clone())
                .collect()
        };
        for handle in handles {
            handle.apply(diff)?;
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStore {
    fn write(&self, diff: &Diff) -> Result<()> {
        // Engine-authored: apply silently, never notify.
        let mut inner = self.inner.borrow_mut();
        for (key, value) in diff.iter() {
            match value {
                Some(loadable) => {
                    inner.items.insert(key.to_owned(), loadable.clone());
                }
                None => {
                    inner.items.remove(key);
                }
            }
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Loadable<Json>>> {
        Ok(self.get(key))
    }

    fn listen(&self, inbound: InboundHandle) -> Option<ListenTeardown> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.push((id, inbound));
            id
        };
        let weak: Weak<RefCell<MemoryInner>> = Rc::downgrade(&self.inner);
        Some(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .borrow_mut()
                    .listeners
                    .retain(|(listener, _)| *listener != id);
            }
        }))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryStore")
            .field("items", &inner.items.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
