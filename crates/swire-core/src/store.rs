#![forbid(unsafe_code)]

//! The cell store: independently-addressable units of reactive state with
//! atomic transactions, commit observation, and a cooperative task queue.
//!
//! # Design
//!
//! [`CellStore`] uses `Rc<RefCell<..>>` for single-threaded shared
//! ownership; cloning a store creates a new handle to the same cells. Cell
//! values are raw [`Json`] loadables; [`CellToken<T>`] layers a typed view
//! on top with serde at the edges.
//!
//! Mutation goes through [`CellStore::transact`]: operations are buffered,
//! validated, then applied as one batch. Observers registered with
//! [`CellStore::on_commit`] run after the batch lands and see the fully
//! committed state — never a partial transaction.
//!
//! Deferred continuations (`schedule`/`pump`) run after the current task,
//! not on a timer: the host drives the queue. A cell set to a pending
//! loadable settles through this queue when its [`Deferred`] resolves, so
//! settlement is observed by a later commit, not mid-transaction.
//!
//! # Invariants
//!
//! 1. An unset cell reads as its declared default value.
//! 2. Setting an already-set cell to an equal value is a no-op: no
//!    modification flag, no commit, no observer notification.
//! 3. A transaction either applies every operation or (on an unknown cell
//!    id) none of them.
//! 4. Observers may read the store but not transact; re-entrant
//!    transactions fail with [`StoreError::ReentrantTransact`].
//! 5. Commit sequence numbers increase by exactly 1 per effective commit.
//!
//! # Failure Modes
//!
//! - Observer/task errors propagate to the caller of `transact`/`pump`
//!   (first error wins; remaining observers still run).
//! - A resolved `Deferred` whose cell has since been overwritten settles
//!   into nothing: the stale settlement is discarded.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use ahash::AHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::commit::{CommitObserver, CommitRecord};
use crate::error::{Result, StoreError};
use crate::loadable::{Deferred, Json, Loadable};

/// Identifier of a cell, unique within its store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u32);

impl CellId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Typed handle to a cell. `Copy`, cheap, and tied to the declaring store
/// only by convention — using it against another store yields
/// [`StoreError::UnknownCell`] or a codec error.
pub struct CellToken<T> {
    id: CellId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CellToken<T> {
    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }
}

impl<T> Clone for CellToken<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CellToken<T> {}

impl<T> std::fmt::Debug for CellToken<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CellToken").field(&self.id).finish()
    }
}

struct CellSlot {
    label: String,
    default: Json,
    loadable: Loadable<Json>,
    is_set: bool,
}

type ObserverFn = dyn Fn(&CellStore, &CommitRecord) -> Result<()>;
type Task = Box<dyn FnOnce(&CellStore) -> Result<()>>;

struct StoreInner {
    cells: Vec<CellSlot>,
    labels: AHashMap<String, CellId>,
    observers: Vec<(u64, Rc<ObserverFn>)>,
    next_observer: u64,
    tasks: VecDeque<Task>,
    notifying: bool,
    pumping: bool,
    commit_seq: u64,
}

/// A buffered batch of cell mutations, applied atomically on commit.
#[derive(Default)]
pub struct Transaction {
    ops: Vec<Op>,
}

enum Op {
    Set(CellId, Loadable<Json>),
    Reset(CellId),
}

impl Op {
    fn id(&self) -> CellId {
        match self {
            Op::Set(id, _) | Op::Reset(id) => *id,
        }
    }
}

impl Transaction {
    /// Set a cell to a settled raw value.
    pub fn set_json(&mut self, id: CellId, value: Json) {
        self.ops.push(Op::Set(id, Loadable::Value(value)));
    }

    /// Set a cell to an arbitrary loadable (value, error, or pending).
    pub fn set_loadable(&mut self, id: CellId, loadable: Loadable<Json>) {
        self.ops.push(Op::Set(id, loadable));
    }

    /// Set a cell through its typed token.
    pub fn set<T: Serialize>(&mut self, token: &CellToken<T>, value: T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        self.set_json(token.id, json);
        Ok(())
    }

    /// Reset a cell to its declared default (unset status).
    pub fn reset(&mut self, id: CellId) {
        self.ops.push(Op::Reset(id));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Single-threaded store of reactive state cells.
///
/// Cloning is cheap and shares the underlying cells.
pub struct CellStore {
    inner: Rc<RefCell<StoreInner>>,
}

/// Non-owning store handle for callbacks that must not keep the store
/// alive (waiters on long-lived [`Deferred`]s, for instance).
pub struct WeakCellStore {
    inner: std::rc::Weak<RefCell<StoreInner>>,
}

impl WeakCellStore {
    /// Upgrade back to a strong handle, if the store still exists.
    #[must_use]
    pub fn upgrade(&self) -> Option<CellStore> {
        self.inner.upgrade().map(|inner| CellStore { inner })
    }
}

impl Clone for WeakCellStore {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for WeakCellStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakCellStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Clone for CellStore {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CellStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("CellStore")
            .field("cells", &inner.cells.len())
            .field("observers", &inner.observers.len())
            .field("commit_seq", &inner.commit_seq)
            .finish()
    }
}

impl CellStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                cells: Vec::new(),
                labels: AHashMap::new(),
                observers: Vec::new(),
                next_observer: 1,
                tasks: VecDeque::new(),
                notifying: false,
                pumping: false,
                commit_seq: 0,
            })),
        }
    }

    // ── Cell declaration ────────────────────────────────────────────

    /// Declare a cell with a raw default value. Labels must be unique
    /// within the store.
    pub fn cell(&self, label: &str, default: Json) -> Result<CellId> {
        let mut inner = self.inner.borrow_mut();
        if inner.labels.contains_key(label) {
            return Err(StoreError::DuplicateCell(label.to_owned()));
        }
        let id = CellId(u32::try_from(inner.cells.len()).expect("cell count fits in u32"));
        inner.cells.push(CellSlot {
            label: label.to_owned(),
            loadable: Loadable::Value(default.clone()),
            default,
            is_set: false,
        });
        inner.labels.insert(label.to_owned(), id);
        Ok(id)
    }

    /// Declare a cell with a typed default, returning a typed token.
    pub fn cell_typed<T: Serialize>(&self, label: &str, default: T) -> Result<CellToken<T>> {
        let json = serde_json::to_value(default)?;
        Ok(CellToken {
            id: self.cell(label, json)?,
            _marker: PhantomData,
        })
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// The cell's current loadable. Unset cells read as their default.
    pub fn loadable(&self, id: CellId) -> Result<Loadable<Json>> {
        let inner = self.inner.borrow();
        let slot = inner.cells.get(id.index()).ok_or(StoreError::UnknownCell(id))?;
        Ok(slot.loadable.clone())
    }

    /// Whether the cell has been explicitly set (as opposed to resting at
    /// its default).
    pub fn is_set(&self, id: CellId) -> Result<bool> {
        let inner = self.inner.borrow();
        let slot = inner.cells.get(id.index()).ok_or(StoreError::UnknownCell(id))?;
        Ok(slot.is_set)
    }

    /// The cell's declared default value.
    pub fn default_of(&self, id: CellId) -> Result<Json> {
        let inner = self.inner.borrow();
        let slot = inner.cells.get(id.index()).ok_or(StoreError::UnknownCell(id))?;
        Ok(slot.default.clone())
    }

    /// The cell's declared label.
    pub fn label(&self, id: CellId) -> Result<String> {
        let inner = self.inner.borrow();
        let slot = inner.cells.get(id.index()).ok_or(StoreError::UnknownCell(id))?;
        Ok(slot.label.clone())
    }

    /// Typed read through a token. The pending arm carries the raw
    /// computation unchanged.
    pub fn get<T: DeserializeOwned>(&self, token: &CellToken<T>) -> Result<Loadable<T>> {
        Ok(match self.loadable(token.id)? {
            Loadable::Value(v) => Loadable::Value(serde_json::from_value(v)?),
            Loadable::Error(e) => Loadable::Error(e),
            Loadable::Pending(d) => Loadable::Pending(d),
        })
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.inner.borrow().cells.len()
    }

    /// Sequence number of the last effective commit (0 before any).
    #[must_use]
    pub fn commit_seq(&self) -> u64 {
        self.inner.borrow().commit_seq
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Run `body` against a buffered transaction, then apply the batch
    /// atomically. Observers fire once if anything actually changed.
    pub fn transact<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        if self.inner.borrow().notifying {
            return Err(StoreError::ReentrantTransact);
        }
        let mut tx = Transaction::default();
        body(&mut tx)?;
        self.apply(tx.ops)
    }

    /// One-op convenience: set a typed cell.
    pub fn set<T: Serialize>(&self, token: &CellToken<T>, value: T) -> Result<()> {
        let json = serde_json::to_value(value)?;
        self.set_json(token.id, json)
    }

    /// One-op convenience: set a cell to a raw value.
    pub fn set_json(&self, id: CellId, value: Json) -> Result<()> {
        self.transact(|tx| {
            tx.set_json(id, value);
            Ok(())
        })
    }

    /// One-op convenience: reset a cell to its default.
    pub fn reset(&self, id: CellId) -> Result<()> {
        self.transact(|tx| {
            tx.reset(id);
            Ok(())
        })
    }

    fn apply(&self, ops: Vec<Op>) -> Result<()> {
        let (record, adopted) = {
            let mut inner = self.inner.borrow_mut();
            if inner.notifying {
                return Err(StoreError::ReentrantTransact);
            }
            // Validate every id up front so the batch is all-or-nothing.
            for op in &ops {
                let id = op.id();
                if id.index() >= inner.cells.len() {
                    return Err(StoreError::UnknownCell(id));
                }
            }
            // Snapshot pre-state of touched cells, first-touch order.
            let mut touched: Vec<(CellId, bool, Loadable<Json>)> = Vec::new();
            for op in &ops {
                let id = op.id();
                if !touched.iter().any(|(t, _, _)| *t == id) {
                    let slot = &inner.cells[id.index()];
                    touched.push((id, slot.is_set, slot.loadable.clone()));
                }
            }
            let mut adopted: Vec<(CellId, Deferred)> = Vec::new();
            for op in ops {
                match op {
                    Op::Set(id, loadable) => {
                        let slot = &mut inner.cells[id.index()];
                        if slot.is_set && slot.loadable == loadable {
                            continue;
                        }
                        if let Loadable::Pending(d) = &loadable {
                            adopted.retain(|(cell, _)| *cell != id);
                            adopted.push((id, d.clone()));
                        } else {
                            adopted.retain(|(cell, _)| *cell != id);
                        }
                        slot.loadable = loadable;
                        slot.is_set = true;
                    }
                    Op::Reset(id) => {
                        let slot = &mut inner.cells[id.index()];
                        if !slot.is_set {
                            continue;
                        }
                        slot.loadable = Loadable::Value(slot.default.clone());
                        slot.is_set = false;
                        adopted.retain(|(cell, _)| *cell != id);
                    }
                }
            }
            // A cell set and then restored within one batch is not modified.
            let modified: Vec<CellId> = touched
                .iter()
                .filter(|(id, was_set, was)| {
                    let slot = &inner.cells[id.index()];
                    slot.is_set != *was_set || slot.loadable != *was
                })
                .map(|(id, _, _)| *id)
                .collect();
            if modified.is_empty() {
                return Ok(());
            }
            inner.commit_seq += 1;
            (CommitRecord::new(inner.commit_seq, modified), adopted)
        };

        for (id, deferred) in adopted {
            self.watch_pending(id, deferred);
        }
        self.notify(&record)
    }

    /// Arrange for a pending cell to settle (via the task queue) when its
    /// computation resolves. Stale settlements are discarded.
    fn watch_pending(&self, id: CellId, deferred: Deferred) {
        let weak = Rc::downgrade(&self.inner);
        let origin = deferred.clone();
        deferred.on_resolve(move |value| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let store = CellStore { inner };
            let value = value.clone();
            store.schedule(move |s| {
                match s.loadable(id)? {
                    Loadable::Pending(current) if current.same(&origin) => s.transact(|tx| {
                        tx.set_json(id, value.clone());
                        Ok(())
                    }),
                    _ => Ok(()),
                }
            });
        });
    }

    fn notify(&self, record: &CommitRecord) -> Result<()> {
        let observers: Vec<(u64, Rc<ObserverFn>)> = {
            let inner = self.inner.borrow();
            inner
                .observers
                .iter()
                .map(|(id, cb)| (*id, Rc::clone(cb)))
                .collect()
        };
        self.inner.borrow_mut().notifying = true;
        let mut first_err = None;
        for (id, cb) in observers {
            // An observer dropped by an earlier callback must not fire.
            let active = {
                let inner = self.inner.borrow();
                inner.observers.iter().any(|(oid, _)| *oid == id)
            };
            if !active {
                continue;
            }
            if let Err(err) = cb(self, record) {
                first_err.get_or_insert(err);
            }
        }
        self.inner.borrow_mut().notifying = false;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ── Commit observation ──────────────────────────────────────────

    /// Register a commit observer. Observers run in registration order and
    /// receive the store handle plus the [`CommitRecord`]; errors propagate
    /// out of the committing `transact`.
    #[must_use]
    pub fn on_commit<F>(&self, observer: F) -> CommitObserver
    where
        F: Fn(&CellStore, &CommitRecord) -> Result<()> + 'static,
    {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_observer;
            inner.next_observer += 1;
            inner.observers.push((id, Rc::new(observer)));
            id
        };
        let weak = Rc::downgrade(&self.inner);
        CommitObserver {
            unregister: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().observers.retain(|(oid, _)| *oid != id);
                }
            })),
        }
    }

    // ── Task queue ──────────────────────────────────────────────────

    /// Queue a continuation to run on the next [`pump`](Self::pump).
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&CellStore) -> Result<()> + 'static,
    {
        self.inner.borrow_mut().tasks.push_back(Box::new(task));
    }

    /// Drain the task queue (FIFO), including tasks scheduled while
    /// draining. Returns the first task error, after running the rest.
    pub fn pump(&self) -> Result<()> {
        if self.inner.borrow().pumping {
            return Ok(());
        }
        self.inner.borrow_mut().pumping = true;
        let mut first_err = None;
        loop {
            let task = self.inner.borrow_mut().tasks.pop_front();
            let Some(task) = task else {
                break;
            };
            if let Err(err) = task(self) {
                first_err.get_or_insert(err);
            }
        }
        self.inner.borrow_mut().pumping = false;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// A non-owning handle to this store.
    #[must_use]
    pub fn downgrade(&self) -> WeakCellStore {
        WeakCellStore {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
