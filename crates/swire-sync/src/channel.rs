#![forbid(unsafe_code)]

//! Channel attachment: wiring a storage backend to a store + registry.
//!
//! [`SyncChannel::attach`] is the subscription: it installs the channel's
//! storage descriptor, registers the outbound flusher as a commit
//! observer, and hands the backend an [`InboundHandle`] through `listen`.
//! The returned value is an RAII guard — dropping it removes the
//! descriptor (outbound triggers become no-ops), unsubscribes the
//! observer, and runs the backend's listen teardown. Detaching does not
//! touch cell registrations; those belong to the binding effects.
//!
//! Backends that only implement part of the contract attach through
//! [`SyncChannel::attach_with`] and [`SyncHooks`], which models the
//! descriptor as it really is: a pair of optional functions plus an
//! optional listen installer.

use std::rc::Rc;

use tracing::debug;

use swire_core::{CellStore, CommitObserver, Json, Loadable, StoreError};

use crate::diff::Diff;
use crate::error::Result;
use crate::inbound::InboundHandle;
use crate::key::ChannelKey;
use crate::outbound;
use crate::registry::SyncRegistry;

/// Teardown returned by a backend's listen installer.
pub type ListenTeardown = Box<dyn FnOnce()>;

/// The storage backend contract, supplied per channel.
pub trait StorageBackend {
    /// Persist a diff. Failures propagate unmodified to the caller of the
    /// triggering commit.
    fn write(&self, diff: &Diff) -> Result<()>;

    /// Current external value for an item key, or `None` when absent.
    /// Decoding failures are configuration errors.
    fn read(&self, key: &str) -> Result<Option<Loadable<Json>>>;

    /// Install a push mechanism for external changes. The backend keeps
    /// the handle and calls [`InboundHandle::apply`] on change; the
    /// returned teardown runs at detach. Defaults to "no push support".
    fn listen(&self, inbound: InboundHandle) -> Option<ListenTeardown> {
        let _ = inbound;
        None
    }
}

/// A channel descriptor as raw hooks, for partial backends.
#[derive(Default)]
pub struct SyncHooks {
    pub write: Option<Rc<dyn Fn(&Diff) -> Result<()>>>,
    pub read: Option<Rc<dyn Fn(&str) -> Result<Option<Loadable<Json>>>>>,
    pub listen: Option<Box<dyn FnOnce(InboundHandle) -> Option<ListenTeardown>>>,
}

impl SyncHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn write(mut self, write: impl Fn(&Diff) -> Result<()> + 'static) -> Self {
        self.write = Some(Rc::new(write));
        self
    }

    #[must_use]
    pub fn read(
        mut self,
        read: impl Fn(&str) -> Result<Option<Loadable<Json>>> + 'static,
    ) -> Self {
        self.read = Some(Rc::new(read));
        self
    }

    #[must_use]
    pub fn listen(
        mut self,
        listen: impl FnOnce(InboundHandle) -> Option<ListenTeardown> + 'static,
    ) -> Self {
        self.listen = Some(Box::new(listen));
        self
    }
}

/// An active synchronization subscription for one channel.
pub struct SyncChannel {
    registry: SyncRegistry,
    channel: ChannelKey,
    generation: u64,
    _commit_observer: CommitObserver,
    teardown: Option<ListenTeardown>,
}

impl SyncChannel {
    /// Attach a full storage backend to a channel.
    pub fn attach<B: StorageBackend + 'static>(
        store: &CellStore,
        registry: &SyncRegistry,
        channel: ChannelKey,
        backend: Rc<B>,
    ) -> Self {
        let write_backend = Rc::clone(&backend);
        let read_backend = Rc::clone(&backend);
        let hooks = SyncHooks::new()
            .write(move |diff| write_backend.write(diff))
            .read(move |key| read_backend.read(key))
            .listen(move |inbound| backend.listen(inbound));
        Self::attach_with(store, registry, channel, hooks)
    }

    /// Attach raw hooks to a channel. Absent hooks leave the matching half
    /// of the protocol inert (no reads at bind, no writes on commit, no
    /// inbound deliveries).
    pub fn attach_with(
        store: &CellStore,
        registry: &SyncRegistry,
        channel: ChannelKey,
        hooks: SyncHooks,
    ) -> Self {
        let generation = registry.set_storage(&channel, hooks.write, hooks.read);

        let observer_registry = registry.clone();
        let observer_channel = channel.clone();
        let commit_observer = store.on_commit(move |s, record| {
            outbound::flush_commit(s, &observer_registry, &observer_channel, record)
                .map_err(StoreError::from)
        });

        let teardown = hooks.listen.and_then(|listen| {
            listen(InboundHandle::new(
                store.clone(),
                registry.clone(),
                channel.clone(),
            ))
        });

        debug!(%channel, generation, "channel attached");
        Self {
            registry: registry.clone(),
            channel,
            generation,
            _commit_observer: commit_observer,
            teardown,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelKey {
        &self.channel
    }

    /// Tear the subscription down now (same as dropping).
    pub fn detach(self) {}
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
        self.registry.clear_storage(&self.channel, self.generation);
        debug!(channel = %self.channel, "channel detached");
    }
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("channel", &self.channel)
            .field("generation", &self.generation)
            .finish()
    }
}
