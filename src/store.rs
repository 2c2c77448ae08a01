//! Publish/subscribe bridge exposing room state to UI subscribers.
//!
//! Subscribers read immutable snapshots via [`Store::snapshot()`] and get
//! notified via registered listeners. [`Store::notify()`] is called exactly
//! once after every reconciled SDK event, synchronously, so listeners always
//! observe a consistent post-event snapshot.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use derive_more::Display;

use crate::snapshot::RoomSnapshot;

/// [`Store`] of [`RoomSnapshot`]s.
pub type RoomStore = Store<RoomSnapshot>;

/// Part of the state a notification is about.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Reason {
    /// Connection state changed.
    Connection,

    /// Remote users joined, left or changed their state.
    Roster,

    /// Remote tracks were published, unpublished or subscribed.
    Tracks,

    /// Local tracks were created, published or removed.
    LocalTracks,

    /// Input devices were enumerated or selected.
    Devices,

    /// Live-streaming session changed its state.
    Live,

    /// Notices were added or dismissed.
    Notices,
}

/// Key of a registered listener.
type ListenerKey = u64;

/// Listener of [`Store`] changes.
type Listener = Rc<dyn Fn(Reason)>;

/// Change-notifying holder of cached immutable snapshots.
pub struct Store<S> {
    /// Registered listeners in their registration order.
    listeners: RefCell<Vec<(ListenerKey, Listener)>>,

    /// Last issued [`ListenerKey`].
    last_key: Cell<ListenerKey>,

    /// Number of notifications happened so far.
    version: Cell<u64>,

    /// Snapshot built since the last notification, if any.
    cached: RefCell<Option<Rc<S>>>,
}

impl<S> Default for Store<S> {
    fn default() -> Self {
        Self {
            listeners: RefCell::default(),
            last_key: Cell::new(0),
            version: Cell::new(0),
            cached: RefCell::new(None),
        }
    }
}

impl<S: 'static> Store<S> {
    /// Returns the current snapshot.
    ///
    /// Snapshot is built with the provided `build` function only once per
    /// notification, so consecutive calls return the same [`Rc`].
    pub fn snapshot<F: FnOnce() -> S>(&self, build: F) -> Rc<S> {
        if let Some(cached) = self.cached.borrow().as_ref() {
            return Rc::clone(cached);
        }
        let snapshot = Rc::new(build());
        self.cached.replace(Some(Rc::clone(&snapshot)));
        snapshot
    }

    /// Returns the number of notifications happened so far.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// Registers the provided `listener`.
    ///
    /// The listener stays registered while the returned [`ListenerHandle`]
    /// is alive.
    pub fn register<F>(self: &Rc<Self>, listener: F) -> ListenerHandle<S>
    where
        F: Fn(Reason) + 'static,
    {
        let key = self.last_key.get() + 1;
        self.last_key.set(key);
        self.listeners.borrow_mut().push((key, Rc::new(listener)));
        ListenerHandle {
            key,
            store: Rc::downgrade(self),
        }
    }

    /// Invalidates the cached snapshot and invokes all the registered
    /// listeners.
    pub fn notify(&self, reason: Reason) {
        self.version.set(self.version.get() + 1);
        self.cached.replace(None);

        // Listeners may (un)register other listeners or read a snapshot.
        let listeners: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(reason);
        }
    }

    /// Removes a listener with the given key.
    fn unregister(&self, key: ListenerKey) {
        self.listeners.borrow_mut().retain(|(k, _)| *k != key);
    }
}

/// Registration of a [`Store`] listener.
///
/// Unregisters the listener on drop.
pub struct ListenerHandle<S: 'static> {
    key: ListenerKey,
    store: Weak<Store<S>>,
}

impl<S: 'static> ListenerHandle<S> {
    /// Unregisters the listener right away.
    #[inline]
    pub fn unregister(self) {
        drop(self);
    }
}

impl<S: 'static> Drop for ListenerHandle<S> {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unregister(self.key);
        }
    }
}
